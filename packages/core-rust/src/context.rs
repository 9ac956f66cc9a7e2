use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::traits::{CallContext, ContextFactory};

/// Context that records everything an operation reports.
///
/// Used as the injected stand-in when a host wants to inspect what an
/// operation logged, and throughout the tests.
#[derive(Debug, Default)]
pub struct RecordingContext {
    request_id: Option<String>,
    messages: Mutex<Vec<String>>,
    progress: Mutex<Vec<(u64, u64)>>,
}

impl RecordingContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            ..Self::default()
        }
    }

    /// Info messages in emission order.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// `(current, total)` progress reports in emission order.
    #[must_use]
    pub fn progress(&self) -> Vec<(u64, u64)> {
        self.progress.lock().clone()
    }
}

impl CallContext for RecordingContext {
    fn info(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }

    fn report_progress(&self, current: u64, total: u64) {
        self.progress.lock().push((current, total));
    }

    fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

/// Context that forwards reports to `tracing` events.
#[derive(Debug, Clone)]
pub struct TracingContext {
    group: String,
    operation: String,
}

impl TracingContext {
    pub fn new(group: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            operation: operation.into(),
        }
    }
}

impl CallContext for TracingContext {
    fn info(&self, message: &str) {
        info!(group = %self.group, operation = %self.operation, "{message}");
    }

    fn report_progress(&self, current: u64, total: u64) {
        info!(group = %self.group, operation = %self.operation, current, total, "progress");
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Creates [`TracingContext`]s. Hosts use this unless told otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingContextFactory;

impl ContextFactory for TracingContextFactory {
    fn create(&self, group: &str, operation: &str) -> Arc<dyn CallContext> {
        Arc::new(TracingContext::new(group, operation))
    }
}

/// Creates [`RecordingContext`]s and keeps a handle to each one.
#[derive(Debug, Default)]
pub struct RecordingContextFactory {
    created: Mutex<Vec<(String, Arc<RecordingContext>)>>,
}

impl RecordingContextFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every context created so far, keyed by qualified operation name.
    #[must_use]
    pub fn created(&self) -> Vec<(String, Arc<RecordingContext>)> {
        self.created.lock().clone()
    }

    /// The most recent context created for `qualified` (`group.operation`).
    #[must_use]
    pub fn last_for(&self, qualified: &str) -> Option<Arc<RecordingContext>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == qualified)
            .map(|(_, ctx)| Arc::clone(ctx))
    }
}

impl ContextFactory for RecordingContextFactory {
    fn create(&self, group: &str, operation: &str) -> Arc<dyn CallContext> {
        let ctx = Arc::new(RecordingContext::new());
        self.created
            .lock()
            .push((format!("{group}.{operation}"), Arc::clone(&ctx)));
        ctx
    }
}
