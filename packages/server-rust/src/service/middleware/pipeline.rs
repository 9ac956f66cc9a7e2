//! Pipeline composition: combines all middleware layers into a single service stack.

use tower::ServiceBuilder;

use super::load_shed::{LoadShedLayer, LoadShedService};
use super::metrics::{MetricsLayer, MetricsService};
use crate::service::config::ServerConfig;
use crate::service::router::OperationRouter;

/// The composed dispatch stack. Cheap to clone; the load-shed semaphore is shared.
pub type DispatchPipeline = LoadShedService<MetricsService<OperationRouter>>;

/// Build the dispatch pipeline by wrapping the `OperationRouter` with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `LoadShedLayer` -- reject when overloaded (fail fast before doing any work)
/// 2. `MetricsLayer` -- record timing and outcome (closest to the actual handler)
///
/// Deadlines are enforced per batch by the batch executor, not per call.
#[must_use]
pub fn build_dispatch_pipeline(router: OperationRouter, config: &ServerConfig) -> DispatchPipeline {
    ServiceBuilder::new()
        .layer(LoadShedLayer::new(config.max_concurrent_operations))
        .layer(MetricsLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
