use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use opdispatch_core::{ExecutionRequest, ExecutionResponse};
use parking_lot::RwLock;
use tracing::info;

use super::descriptor::ServiceGroup;
use super::group::GroupRuntime;
use super::operation::{Cancelled, ConfigurationError, OperationInfo};

// ---------------------------------------------------------------------------
// ManagedGroup trait
// ---------------------------------------------------------------------------

/// Object-safe view of a group runtime, independent of the group's type.
///
/// Groups are registered with a [`GroupRegistry`] and cleaned up in reverse
/// registration order.
#[async_trait]
pub trait ManagedGroup: Send + Sync {
    /// Unique name of this group (e.g. `"example"`).
    fn name(&self) -> &str;

    /// Metadata of every registered operation, sorted by name.
    fn operations(&self) -> Vec<Arc<OperationInfo>>;

    /// Dispatches one request without tracking it.
    async fn execute(&self, request: ExecutionRequest) -> ExecutionResponse;

    /// Dispatches one request, tracked so cleanup can cancel it.
    async fn execute_tracked(&self, request: ExecutionRequest) -> Result<ExecutionResponse, Cancelled>;

    /// Closes the group and cancels outstanding tracked calls.
    async fn cleanup(&self) -> usize;

    /// Number of tracked calls currently running.
    fn in_flight_count(&self) -> usize;
}

#[async_trait]
impl<G: ServiceGroup> ManagedGroup for GroupRuntime<G> {
    fn name(&self) -> &str {
        GroupRuntime::name(self)
    }

    fn operations(&self) -> Vec<Arc<OperationInfo>> {
        self.registry().infos()
    }

    async fn execute(&self, request: ExecutionRequest) -> ExecutionResponse {
        GroupRuntime::execute(self, request).await
    }

    async fn execute_tracked(&self, request: ExecutionRequest) -> Result<ExecutionResponse, Cancelled> {
        GroupRuntime::execute_tracked(self, request).await
    }

    async fn cleanup(&self) -> usize {
        GroupRuntime::cleanup(self).await
    }

    fn in_flight_count(&self) -> usize {
        self.in_flight().len()
    }
}

// ---------------------------------------------------------------------------
// GroupRegistry
// ---------------------------------------------------------------------------

/// Name -> group lookup with deterministic teardown order.
pub struct GroupRegistry {
    by_name: DashMap<String, Arc<dyn ManagedGroup>>,
    /// Registration order for deterministic shutdown sequencing.
    order: RwLock<Vec<String>>,
}

impl GroupRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Registers a group under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateGroup`] if the name is taken.
    pub fn register(&self, group: Arc<dyn ManagedGroup>) -> Result<(), ConfigurationError> {
        let name = group.name().to_string();
        match self.by_name.entry(name.clone()) {
            Entry::Occupied(_) => Err(ConfigurationError::DuplicateGroup { name }),
            Entry::Vacant(slot) => {
                slot.insert(group);
                self.order.write().push(name);
                Ok(())
            }
        }
    }

    /// Retrieve a group by its name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ManagedGroup>> {
        self.by_name.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Group names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Cleans up all groups in reverse registration order.
    ///
    /// Returns the total number of calls cancelled.
    pub async fn shutdown_all(&self) -> usize {
        let order = self.order.read().clone();
        let mut cancelled = 0;
        for name in order.iter().rev() {
            if let Some(group) = self.get(name) {
                let count = group.cleanup().await;
                info!(group = %name, cancelled = count, "group shut down");
                cancelled += count;
            }
        }
        cancelled
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use opdispatch_core::Content;

    use super::*;

    /// Test group that records cleanup ordering.
    struct TestGroup {
        group_name: &'static str,
        order_log: Arc<parking_lot::Mutex<Vec<String>>>,
    }

    impl TestGroup {
        fn new(name: &'static str, order_log: Arc<parking_lot::Mutex<Vec<String>>>) -> Arc<dyn ManagedGroup> {
            Arc::new(Self {
                group_name: name,
                order_log,
            })
        }
    }

    #[async_trait]
    impl ManagedGroup for TestGroup {
        fn name(&self) -> &str {
            self.group_name
        }

        fn operations(&self) -> Vec<Arc<OperationInfo>> {
            Vec::new()
        }

        async fn execute(&self, request: ExecutionRequest) -> ExecutionResponse {
            ExecutionResponse::success(Content::text(request.operation))
        }

        async fn execute_tracked(&self, request: ExecutionRequest) -> Result<ExecutionResponse, Cancelled> {
            Ok(self.execute(request).await)
        }

        async fn cleanup(&self) -> usize {
            self.order_log.lock().push(format!("cleanup:{}", self.group_name));
            0
        }

        fn in_flight_count(&self) -> usize {
            0
        }
    }

    #[test]
    fn register_and_get_by_name() {
        let registry = GroupRegistry::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        registry.register(TestGroup::new("example", log)).unwrap();

        let group = registry.get("example");
        assert!(group.is_some());
        assert_eq!(group.unwrap().name(), "example");
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = GroupRegistry::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        registry.register(TestGroup::new("example", log.clone())).unwrap();

        let err = registry.register(TestGroup::new("example", log)).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateGroup { name } if name == "example"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_all_runs_in_reverse_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let registry = GroupRegistry::new();
        registry.register(TestGroup::new("first", log.clone())).unwrap();
        registry.register(TestGroup::new("second", log.clone())).unwrap();
        registry.register(TestGroup::new("third", log.clone())).unwrap();

        assert_eq!(registry.names(), vec!["first", "second", "third"]);
        registry.shutdown_all().await;

        let entries = log.lock().clone();
        assert_eq!(
            entries,
            vec!["cleanup:third", "cleanup:second", "cleanup:first"]
        );
    }
}
