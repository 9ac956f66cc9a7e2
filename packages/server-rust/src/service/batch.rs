//! Concurrent batch execution under one shared deadline.
//!
//! Every dispatch in a batch runs as its own tokio task through the
//! [`DispatchPipeline`]. Per-item failures (including panics) become error
//! responses in submission order; exceeding the deadline aborts every task
//! and fails the batch as a whole.

use std::any::Any;
use std::time::Duration;

use futures_util::future::{self, join_all, BoxFuture, FutureExt};
use opdispatch_core::ExecutionResponse;
use tokio::task::{AbortHandle, JoinError};
use tower::ServiceExt;
use tracing::{error, warn};

use super::middleware::DispatchPipeline;
use super::operation::{BatchTimeout, Cancelled, OperationError};
use super::router::RoutedCall;

/// One slot of a batch.
#[derive(Debug)]
pub enum BatchEntry {
    /// Dispatch through the pipeline.
    Dispatch(RoutedCall),
    /// Already answered (e.g. the name could not be routed).
    Ready { label: String, response: ExecutionResponse },
}

impl BatchEntry {
    /// Name used for this entry in timeout messages.
    fn label(&self, qualified: bool) -> String {
        match self {
            Self::Dispatch(call) if qualified => format!("{}.{}", call.group, call.request.operation),
            Self::Dispatch(call) => call.request.operation.clone(),
            Self::Ready { label, .. } => label.clone(),
        }
    }
}

/// Runs batches of dispatches concurrently with a shared deadline.
#[derive(Clone)]
pub struct BatchExecutor {
    pipeline: DispatchPipeline,
    deadline: Duration,
}

impl BatchExecutor {
    #[must_use]
    pub fn new(pipeline: DispatchPipeline, deadline: Duration) -> Self {
        Self { pipeline, deadline }
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Runs every entry concurrently and returns their responses in
    /// submission order.
    ///
    /// `group` names the target group of a single-group batch; it only
    /// affects how the timeout is reported.
    ///
    /// # Errors
    ///
    /// Returns [`BatchTimeout`] if the batch did not finish within the
    /// deadline. All still-running dispatches are aborted first.
    pub async fn run(
        &self,
        entries: Vec<BatchEntry>,
        group: Option<&str>,
    ) -> Result<Vec<ExecutionResponse>, BatchTimeout> {
        let labels: Vec<String> = entries.iter().map(|e| e.label(group.is_none())).collect();
        let mut aborts: Vec<AbortHandle> = Vec::new();

        let pending: Vec<BoxFuture<'static, ExecutionResponse>> = entries
            .into_iter()
            .zip(labels.iter().cloned())
            .map(|(entry, label)| match entry {
                BatchEntry::Ready { response, .. } => future::ready(response).boxed(),
                BatchEntry::Dispatch(call) => {
                    let handle = tokio::spawn(self.pipeline.clone().oneshot(call));
                    aborts.push(handle.abort_handle());
                    async move { settle(label, handle.await) }.boxed()
                }
            })
            .collect();

        match tokio::time::timeout(self.deadline, join_all(pending)).await {
            Ok(responses) => Ok(responses),
            Err(_) => {
                for handle in &aborts {
                    handle.abort();
                }
                let timeout = BatchTimeout {
                    operations: labels,
                    group: group.map(str::to_string),
                    deadline: self.deadline,
                };
                error!(aborted = aborts.len(), error = %timeout, "batch deadline exceeded");
                Err(timeout)
            }
        }
    }
}

/// Converts a finished dispatch task into a response.
fn settle(label: String, joined: Result<Result<ExecutionResponse, OperationError>, JoinError>) -> ExecutionResponse {
    match joined {
        Ok(Ok(response)) => response,
        Ok(Err(error)) => error.into_response(),
        Err(join_error) if join_error.is_panic() => {
            let message = panic_message(join_error.into_panic());
            warn!(operation = %label, %message, "operation panicked");
            OperationError::Panicked { message }.into_response()
        }
        Err(_) => OperationError::from(Cancelled { operation: label }).into_response(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&'static str>()
            .map_or_else(|| "operation panicked".to_string(), |s| (*s).to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
