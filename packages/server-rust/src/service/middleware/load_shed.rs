//! Load shedding for dispatches.
//!
//! A fixed pool of dispatch slots is shared by every clone of the pipeline.
//! A call that finds no free slot is not queued: it fails at once with
//! `OperationError::Overloaded`, is logged, and is counted under
//! [`SHED_TOTAL`] labelled by group.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use opdispatch_core::ExecutionResponse;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};

use crate::service::operation::OperationError;
use crate::service::router::RoutedCall;

/// Counter of calls rejected for lack of capacity, labelled by group.
pub const SHED_TOTAL: &str = "opdispatch_shed_total";

/// Dispatch slots shared by the layer and all services it produced.
#[derive(Debug, Clone)]
pub struct Capacity {
    slots: Arc<Semaphore>,
    limit: usize,
}

impl Capacity {
    #[must_use]
    pub fn new(limit: u32) -> Self {
        let limit = limit as usize;
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Configured number of concurrent dispatches.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Slots not currently held by a dispatch.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Dispatches currently holding a slot.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.limit.saturating_sub(self.available())
    }

    fn claim(&self, call: &RoutedCall) -> Result<OwnedSemaphorePermit, OperationError> {
        Arc::clone(&self.slots).try_acquire_owned().map_err(|_| {
            tracing::warn!(
                group = %call.group,
                operation = %call.request.operation,
                limit = self.limit,
                "dispatch shed: no free slot"
            );
            metrics::counter!(SHED_TOTAL, "group" => call.group.clone()).increment(1);
            OperationError::Overloaded
        })
    }
}

/// Tower layer that bounds concurrent dispatches by a shared [`Capacity`].
#[derive(Debug, Clone)]
pub struct LoadShedLayer {
    capacity: Capacity,
}

impl LoadShedLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            capacity: Capacity::new(max_concurrent),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> &Capacity {
        &self.capacity
    }
}

impl<S> Layer<S> for LoadShedLayer {
    type Service = LoadShedService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoadShedService {
            inner,
            capacity: self.capacity.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadShedService<S> {
    inner: S,
    capacity: Capacity,
}

impl<S> LoadShedService<S> {
    #[must_use]
    pub fn capacity(&self) -> &Capacity {
        &self.capacity
    }
}

impl<S> Service<RoutedCall> for LoadShedService<S>
where
    S: Service<RoutedCall, Response = ExecutionResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = ExecutionResponse;
    type Error = OperationError;
    type Future = BoxFuture<'static, Result<ExecutionResponse, OperationError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: RoutedCall) -> Self::Future {
        match self.capacity.claim(&call) {
            Ok(slot) => {
                let fut = self.inner.call(call);
                Box::pin(async move {
                    // Held until the inner dispatch settles or the future is dropped.
                    let _slot = slot;
                    fut.await
                })
            }
            Err(shed) => Box::pin(async move { Err(shed) }),
        }
    }
}
