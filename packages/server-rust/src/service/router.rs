//! Group routing: dispatches a [`RoutedCall`] to its group by name.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use opdispatch_core::{ExecutionRequest, ExecutionResponse};
use tower::Service;

use super::operation::OperationError;
use super::registry::GroupRegistry;

/// One request addressed to a group.
#[derive(Debug, Clone)]
pub struct RoutedCall {
    pub group: String,
    pub request: ExecutionRequest,
}

impl RoutedCall {
    pub fn new(group: impl Into<String>, request: ExecutionRequest) -> Self {
        Self {
            group: group.into(),
            request,
        }
    }
}

// ---------------------------------------------------------------------------
// OperationRouter
// ---------------------------------------------------------------------------

/// Routes [`RoutedCall`] values to the registered group of the same name.
///
/// Calls are dispatched on the tracked path so group teardown can cancel them.
/// An unregistered group name yields `OperationError::UnknownGroup`.
#[derive(Clone)]
pub struct OperationRouter {
    groups: Arc<GroupRegistry>,
}

impl OperationRouter {
    #[must_use]
    pub fn new(groups: Arc<GroupRegistry>) -> Self {
        Self { groups }
    }

    #[must_use]
    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }
}

impl Service<RoutedCall> for OperationRouter {
    type Response = ExecutionResponse;
    type Error = OperationError;
    type Future = BoxFuture<'static, Result<ExecutionResponse, OperationError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: RoutedCall) -> Self::Future {
        let groups = Arc::clone(&self.groups);
        Box::pin(async move {
            let RoutedCall { group, request } = call;
            let Some(target) = groups.get(&group) else {
                return Err(OperationError::UnknownGroup { name: group });
            };
            Ok(target.execute_tracked(request).await?)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
