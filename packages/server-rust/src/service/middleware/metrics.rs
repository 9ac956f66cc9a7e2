//! Metrics middleware for dispatches.
//!
//! Wraps each call in a `tracing` span and records a counter and a latency
//! histogram through the `metrics` facade. Without an installed recorder the
//! `metrics` calls are no-ops.

use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::future::BoxFuture;
use opdispatch_core::ExecutionResponse;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::OperationError;
use crate::service::router::RoutedCall;

/// Counter of completed dispatches, labelled by group and outcome.
pub const OPERATIONS_TOTAL: &str = "opdispatch_operations_total";
/// Histogram of dispatch latency in seconds, labelled by group.
pub const OPERATION_DURATION: &str = "opdispatch_operation_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments dispatches with timing and counting.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records dispatch duration and outcome.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Outcome label: `ok` or the error kind of the failure.
fn outcome(result: &Result<ExecutionResponse, OperationError>) -> &'static str {
    match result {
        Ok(response) => response.error_kind.map_or("ok", |kind| kind.as_str()),
        Err(error) => error.kind().as_str(),
    }
}

impl<S> Service<RoutedCall> for MetricsService<S>
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
        let group = call.group.clone();
        let operation = call.request.operation.clone();

        let span = info_span!(
            "dispatch",
            group = %group,
            operation = %operation,
            request_id = %call.request.id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();
                let outcome = outcome(&result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = elapsed.as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                metrics::counter!(OPERATIONS_TOTAL, "group" => group.clone(), "outcome" => outcome).increment(1);
                metrics::histogram!(OPERATION_DURATION, "group" => group.clone()).record(elapsed.as_secs_f64());

                tracing::info!(
                    group = %group,
                    operation = %operation,
                    duration_ms,
                    outcome,
                    "dispatch complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use opdispatch_core::{Content, ErrorKind, ExecutionRequest};
    use tower::ServiceExt;

    use super::*;

    /// Immediately-completing service that echoes the operation name.
    struct ImmediateService;

    impl Service<RoutedCall> for ImmediateService {
        type Response = ExecutionResponse;
        type Error = OperationError;
        type Future = BoxFuture<'static, Result<ExecutionResponse, OperationError>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, call: RoutedCall) -> Self::Future {
            let operation = call.request.operation;
            Box::pin(async move { Ok(ExecutionResponse::success(Content::text(operation))) })
        }
    }

    #[tokio::test]
    async fn metrics_layer_passes_through_response() {
        let svc = MetricsLayer.layer(ImmediateService);
        let call = RoutedCall::new("example", ExecutionRequest::new("echo", None));

        let resp = svc.oneshot(call).await.unwrap();
        assert_eq!(resp.content, Content::text("echo"));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome(&Ok(ExecutionResponse::success(Content::text("x")))), "ok");
        assert_eq!(
            outcome(&Ok(ExecutionResponse::failure(ErrorKind::Validation, "bad"))),
            "validation"
        );
        assert_eq!(outcome(&Err(OperationError::Overloaded)), "resource");
    }
}
