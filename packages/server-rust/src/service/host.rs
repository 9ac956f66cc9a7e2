//! The dispatch host: group registration plus qualified-name routing.

use std::sync::Arc;

use opdispatch_core::{
    Arguments, ContextFactory, ExecutionRequest, ExecutionResponse, QualifiedCall, ServiceRequest, ServiceResponse,
    TracingContextFactory,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::batch::{BatchEntry, BatchExecutor};
use super::config::{GroupCatalog, GroupConfig, GroupOptions, ServerConfig, ServiceConfig};
use super::descriptor::ServiceGroup;
use super::group::GroupRuntime;
use super::middleware::build_dispatch_pipeline;
use super::operation::{BatchTimeout, ConfigurationError, OperationError};
use super::registry::{GroupRegistry, ManagedGroup};
use super::router::{OperationRouter, RoutedCall};

/// One entry of the operation listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationListing {
    /// Qualified `group.operation` name.
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<String>,
    pub requires_context: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Owns the registered groups and the dispatch pipeline in front of them.
pub struct ServiceHost {
    config: ServerConfig,
    groups: Arc<GroupRegistry>,
    contexts: Arc<dyn ContextFactory>,
    executor: BatchExecutor,
}

impl ServiceHost {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        let groups = Arc::new(GroupRegistry::new());
        let pipeline = build_dispatch_pipeline(OperationRouter::new(Arc::clone(&groups)), &config);
        let executor = BatchExecutor::new(pipeline, config.operation_timeout());
        Self {
            config,
            groups,
            contexts: Arc::new(TracingContextFactory),
            executor,
        }
    }

    /// Sets the context factory handed to groups registered afterwards.
    #[must_use]
    pub fn with_context_factory(mut self, contexts: Arc<dyn ContextFactory>) -> Self {
        self.contexts = contexts;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<Arc<dyn ManagedGroup>> {
        self.groups.get(name)
    }

    /// Registers `instance` as group `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the group's declarations are
    /// invalid or the name is taken.
    pub fn register<G: ServiceGroup>(&self, name: &str, instance: G) -> Result<(), ConfigurationError> {
        self.register_with_overrides(name, instance, None)
    }

    /// Registers `instance` with per-operation metadata overrides.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the group's declarations or the
    /// overrides are invalid, or the name is taken.
    pub fn register_with_overrides<G: ServiceGroup>(
        &self,
        name: &str,
        instance: G,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<(), ConfigurationError> {
        let runtime = GroupRuntime::with_overrides(name, instance, overrides)?
            .with_context_factory(Arc::clone(&self.contexts))
            .with_lock_timeout(self.config.lock_timeout());
        self.register_managed(Arc::new(runtime))
    }

    /// Registers an already-built group.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateGroup`] if the name is taken.
    pub fn register_managed(&self, group: Arc<dyn ManagedGroup>) -> Result<(), ConfigurationError> {
        let name = group.name().to_string();
        let operations = group.operations().len();
        self.groups.register(group)?;
        info!(group = %name, operations, "group registered");
        Ok(())
    }

    /// Builds and registers one configured group. The locator is the
    /// config's `class_path`, falling back to its name.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the locator is unknown or the
    /// group fails to register.
    pub fn register_group_config(
        &self,
        config: &GroupConfig,
        catalog: &GroupCatalog,
    ) -> Result<(), ConfigurationError> {
        let locator = config.class_path.as_deref().unwrap_or(&config.name);
        let group = catalog.build(locator, config, &self.group_options())?;
        self.register_managed(group)
    }

    /// Builds and registers every group of a service config.
    ///
    /// # Errors
    ///
    /// Stops at the first group that fails to build or register.
    pub fn register_service(&self, service: &ServiceConfig, catalog: &GroupCatalog) -> Result<usize, ConfigurationError> {
        for (locator, config) in &service.groups {
            let group = catalog.build(locator, config, &self.group_options())?;
            self.register_managed(group)?;
        }
        info!(service = %service.name, groups = service.groups.len(), "service registered");
        Ok(service.groups.len())
    }

    fn group_options(&self) -> GroupOptions {
        GroupOptions {
            contexts: Arc::clone(&self.contexts),
            lock_timeout: self.config.lock_timeout(),
        }
    }

    /// Every registered operation, by group registration order then name.
    #[must_use]
    pub fn list_operations(&self) -> Vec<OperationListing> {
        self.groups
            .names()
            .into_iter()
            .filter_map(|name| self.groups.get(&name).map(|group| (name, group)))
            .flat_map(|(name, group)| {
                group.operations().into_iter().map(move |info| OperationListing {
                    name: format!("{name}.{}", info.name),
                    description: info.description.clone(),
                    policy: info.policy.clone(),
                    requires_context: info.requires_context,
                    schema: info.schema_document(),
                })
            })
            .collect()
    }

    /// Dispatches `group.operation` with `arguments`.
    pub async fn route_and_execute(&self, name: &str, arguments: Option<Arguments>) -> ExecutionResponse {
        self.route(QualifiedCall::new(name, arguments)).await
    }

    /// Dispatches one qualified call under the host deadline.
    pub async fn route(&self, call: QualifiedCall) -> ExecutionResponse {
        let entry = Self::entry(call);
        let group = match &entry {
            BatchEntry::Dispatch(routed) => Some(routed.group.clone()),
            BatchEntry::Ready { .. } => None,
        };
        match self.executor.run(vec![entry], group.as_deref()).await {
            Ok(responses) => responses
                .into_iter()
                .next()
                .unwrap_or_else(|| OperationError::failed("no response").into_response()),
            Err(timeout) => OperationError::from(timeout).into_response(),
        }
    }

    /// Runs a batch of requests against one group.
    pub async fn execute_group_batch(&self, group: &str, batch: ServiceRequest) -> ServiceResponse {
        if self.groups.get(group).is_none() {
            let error = OperationError::UnknownGroup { name: group.to_string() }.to_string();
            warn!(%group, "batch for unknown group");
            return ServiceResponse::failed(error.clone(), error);
        }
        debug!(%group, requests = batch.requests.len(), "executing group batch");
        let entries = batch
            .requests
            .into_iter()
            .map(|request| BatchEntry::Dispatch(RoutedCall::new(group, request)))
            .collect();
        Self::collect(self.executor.run(entries, Some(group)).await)
    }

    /// Runs qualified calls that may span groups.
    pub async fn execute_batch(&self, calls: Vec<QualifiedCall>) -> ServiceResponse {
        debug!(calls = calls.len(), "executing batch");
        let entries = calls.into_iter().map(Self::entry).collect();
        Self::collect(self.executor.run(entries, None).await)
    }

    /// Cleans up every group in reverse registration order.
    pub async fn shutdown(&self) -> usize {
        let cancelled = self.groups.shutdown_all().await;
        info!(cancelled, "host shut down");
        cancelled
    }

    fn entry(call: QualifiedCall) -> BatchEntry {
        let QualifiedCall {
            name,
            arguments,
            context,
        } = call;
        let Some((group, operation)) = opdispatch_core::split_qualified(&name) else {
            return BatchEntry::Ready {
                response: OperationError::InvalidName { name: name.clone() }.into_response(),
                label: name,
            };
        };
        let mut request = ExecutionRequest::new(operation, arguments);
        request.context = context;
        BatchEntry::Dispatch(RoutedCall::new(group, request))
    }

    fn collect(outcome: Result<Vec<ExecutionResponse>, BatchTimeout>) -> ServiceResponse {
        match outcome {
            Ok(responses) => ServiceResponse::aggregate(responses),
            Err(timeout) => ServiceResponse::failed(
                format!("Operation timeout: {timeout}"),
                format!("Execution timeout: {timeout}"),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use opdispatch_core::{Content, ErrorKind};
    use serde_json::json;

    use super::*;
    use crate::service::descriptor::{OperationSpec, Registrar};
    use crate::service::operation::{Call, OperationResult};

    struct Notes {
        entries: Vec<String>,
    }

    impl Notes {
        async fn add(&mut self, call: Call) -> OperationResult {
            let text: String = call.arg("text")?;
            self.entries.push(text);
            Ok(json!(self.entries.len()))
        }

        async fn dump(&mut self, _call: Call) -> OperationResult {
            Ok(json!(self.entries.join(",")))
        }
    }

    impl ServiceGroup for Notes {
        fn register(r: &mut Registrar<Self>) {
            r.operation(
                OperationSpec::new("add", |g: &mut Self, c| Box::pin(g.add(c)))
                    .param("text", "str")
                    .doc("Append a note.")
                    .policy(["write"]),
            )
            .operation(OperationSpec::new("dump", |g: &mut Self, c| Box::pin(g.dump(c))));
        }
    }

    fn host() -> ServiceHost {
        let host = ServiceHost::new(ServerConfig::default());
        host.register("notes", Notes { entries: Vec::new() }).unwrap();
        host
    }

    fn args(value: Value) -> Option<Arguments> {
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    #[tokio::test]
    async fn routes_qualified_names() {
        let host = host();
        let response = host.route_and_execute("notes.add", args(json!({"text": "a"}))).await;
        assert_eq!(response.content, Content::text("1"));
    }

    #[tokio::test]
    async fn bad_names_and_groups_are_not_found() {
        let host = host();
        let response = host.route_and_execute("notes", None).await;
        assert_eq!(response.error.as_deref(), Some("Invalid operation name: notes"));
        assert_eq!(response.error_kind, Some(ErrorKind::NotFound));

        let response = host.route_and_execute("missing.add", None).await;
        assert_eq!(response.error.as_deref(), Some("Group not found: missing"));
    }

    #[tokio::test]
    async fn group_batch_aggregates_in_order() {
        let host = host();
        let batch = ServiceRequest {
            requests: vec![
                ExecutionRequest::new("add", args(json!({"text": "x"}))),
                ExecutionRequest::new("add", None),
                ExecutionRequest::new("dump", None),
            ],
        };
        let response = host.execute_group_batch("notes", batch).await;
        assert_eq!(response.errors, vec!["validation failed for add: text: field required"]);
        let text = response.content.to_text();
        assert!(text.starts_with("1\n"));
    }

    #[tokio::test]
    async fn group_batch_for_unknown_group() {
        let response = host().execute_group_batch("ghost", ServiceRequest::default()).await;
        assert_eq!(response.content, Content::text("Group not found: ghost"));
        assert_eq!(response.errors, vec!["Group not found: ghost"]);
    }

    #[tokio::test]
    async fn duplicate_group_registration_fails() {
        let host = host();
        let err = host.register("notes", Notes { entries: Vec::new() }).unwrap_err();
        assert!(matches!(err, ConfigurationError::DuplicateGroup { .. }));
    }

    #[test]
    fn listing_uses_qualified_names() {
        let listing = host().list_operations();
        let names: Vec<_> = listing.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(names, vec!["notes.add", "notes.dump"]);
        assert_eq!(listing[0].description, "Append a note.");
        assert_eq!(listing[0].policy, vec!["write"]);
        assert_eq!(listing[1].description, "Operation dump in group notes");
    }

    #[tokio::test]
    async fn shutdown_closes_groups() {
        let host = host();
        assert_eq!(host.shutdown().await, 0);
        let response = host.route_and_execute("notes.dump", None).await;
        assert_eq!(response.error_kind, Some(ErrorKind::Resource));
    }

    #[tokio::test]
    async fn catalog_materializes_service_config() {
        let catalog = GroupCatalog::new().with("demo:Notes", |_config: &GroupConfig| Notes { entries: Vec::new() });
        let mut service = ServiceConfig {
            name: "svc".into(),
            ..ServiceConfig::default()
        };
        let mut group = GroupConfig::new("journal");
        group.config.insert(
            "operations".into(),
            json!({"add": {"name": "write", "description": "Write a note"}}),
        );
        service.groups.insert("demo:Notes".into(), group);

        let host = ServiceHost::new(ServerConfig {
            operation_timeout_ms: 5_000,
            ..ServerConfig::default()
        });
        assert_eq!(host.register_service(&service, &catalog).unwrap(), 1);
        assert_eq!(host.executor.deadline(), Duration::from_secs(5));

        let response = host.route_and_execute("journal.write", args(json!({"text": "hi"}))).await;
        assert_eq!(response.content, Content::text("1"));
        let listing = host.list_operations();
        assert_eq!(listing[0].name, "journal.dump");
        assert_eq!(listing[1].description, "Write a note");
    }
}
