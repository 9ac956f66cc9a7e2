//! Slow operations for exercising deadlines and cancellation.

use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use crate::service::descriptor::{OperationSpec, Registrar, ServiceGroup};
use crate::service::operation::{Call, OperationError, OperationResult};

/// Yield to the scheduler every this many iterations of `cpu_intensive`.
const YIELD_EVERY: u64 = 100;

#[derive(Debug, Default)]
pub struct TimeoutGroup;

fn seconds(call: &Call, name: &str) -> Result<Duration, OperationError> {
    let secs: f64 = call.arg(name)?;
    Duration::try_from_secs_f64(secs).map_err(|e| OperationError::failed(format!("invalid {name}: {e}")))
}

impl TimeoutGroup {
    async fn sleep(&mut self, call: Call) -> OperationResult {
        let secs: f64 = call.arg("seconds")?;
        tokio::time::sleep(seconds(&call, "seconds")?).await;
        Ok(json!(format!("Slept for {secs:?} seconds")))
    }

    async fn slow_counter(&mut self, call: Call) -> OperationResult {
        let limit: u64 = call.arg("limit")?;
        let delay = seconds(&call, "delay")?;
        let start = Instant::now();

        let mut counted = Vec::new();
        for i in 1..=limit {
            if let Some(ctx) = call.context() {
                ctx.report_progress(i, limit);
            }
            call.info(&format!("Counter: {i}/{limit}"));
            counted.push(i.to_string());
            tokio::time::sleep(delay).await;
        }

        Ok(json!(format!(
            "Counted to {limit} in {:.2} seconds: {}",
            start.elapsed().as_secs_f64(),
            counted.join(", ")
        )))
    }

    async fn cpu_intensive(&mut self, call: Call) -> OperationResult {
        let iterations: u64 = call.arg("iterations")?;
        call.info(&format!("Starting CPU-intensive operation with {iterations} iterations"));
        let start = Instant::now();

        let mut result: u64 = 0;
        for i in 0..iterations {
            if i % YIELD_EVERY == 0 {
                if let Some(ctx) = call.context() {
                    ctx.report_progress(i, iterations);
                }
                tokio::task::yield_now().await;
            }
            result = result.wrapping_add((0..1000_u64).map(|j| j * j).sum::<u64>());
        }

        Ok(json!(format!(
            "Completed {iterations} iterations in {:.2} seconds with result: {result}",
            start.elapsed().as_secs_f64()
        )))
    }
}

impl ServiceGroup for TimeoutGroup {
    fn register(r: &mut Registrar<Self>) {
        r.operation(
            OperationSpec::new("sleep", |g: &mut Self, c| Box::pin(g.sleep(c)))
                .param("seconds", "float")
                .doc("Sleep for the given number of seconds."),
        )
        .operation(
            OperationSpec::new("slow_counter", |g: &mut Self, c| Box::pin(g.slow_counter(c)))
                .param("limit", "int")
                .param("delay", "float")
                .param("ctx", "Context")
                .doc("Count up to `limit`, waiting `delay` seconds between counts."),
        )
        .operation(
            OperationSpec::new("cpu_intensive", |g: &mut Self, c| Box::pin(g.cpu_intensive(c)))
                .param("iterations", "int")
                .param("ctx", "Context")
                .doc("Busy work that yields periodically."),
        );
    }
}
