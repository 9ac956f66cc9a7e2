//! Per-group dispatch.
//!
//! A [`GroupRuntime`] owns one group instance behind a `tokio::sync::Mutex`,
//! so every dispatch against that instance is totally ordered while different
//! groups run in parallel. Dispatch runs:
//!
//! 1. registry lookup
//! 2. lock acquisition (optionally bounded)
//! 3. context resolution and argument shaping
//! 4. schema binding and parameter checks
//! 5. the operation body, then output normalization
//!
//! Every failure becomes an [`ExecutionResponse`] with `error` set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use opdispatch_core::coerce::{FieldIssue, IssueKind};
use opdispatch_core::{
    Arguments, Content, ContextFactory, ExecutionRequest, ExecutionResponse, ParameterTransformer,
    TracingContextFactory, ValidationError,
};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::descriptor::{ServiceGroup, ServiceGroupRegistry};
use super::inflight::{InFlightCalls, InFlightSnapshot};
use super::inject::resolve_context;
use super::operation::{Call, Cancelled, ConfigurationError, OperationError, OperationInfo};

/// A registered group instance plus everything needed to dispatch into it.
pub struct GroupRuntime<G: ServiceGroup> {
    name: String,
    instance: Mutex<G>,
    registry: ServiceGroupRegistry<G>,
    contexts: Arc<dyn ContextFactory>,
    in_flight: Arc<InFlightCalls>,
    lock_timeout: Option<Duration>,
    closed: AtomicBool,
}

impl<G: ServiceGroup> GroupRuntime<G> {
    /// Builds the registry for `G` and wraps `instance`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the group's declarations are invalid.
    pub fn new(name: impl Into<String>, instance: G) -> Result<Self, ConfigurationError> {
        Self::with_overrides(name, instance, None)
    }

    /// Like [`GroupRuntime::new`], applying per-operation metadata overrides
    /// keyed by member name.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the group's declarations or the
    /// overrides are invalid.
    pub fn with_overrides(
        name: impl Into<String>,
        instance: G,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        super::descriptor::validate_name(&name).map_err(|_| ConfigurationError::InvalidGroupName {
            name: name.clone(),
        })?;
        let registry = ServiceGroupRegistry::build(&name, overrides)?;
        Ok(Self {
            name,
            instance: Mutex::new(instance),
            registry,
            contexts: Arc::new(TracingContextFactory),
            in_flight: Arc::new(InFlightCalls::new()),
            lock_timeout: None,
            closed: AtomicBool::new(false),
        })
    }

    /// Sets the factory used for injected contexts.
    #[must_use]
    pub fn with_context_factory(mut self, contexts: Arc<dyn ContextFactory>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Bounds how long a call waits for the group lock before failing as busy.
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn registry(&self) -> &ServiceGroupRegistry<G> {
        &self.registry
    }

    #[must_use]
    pub fn in_flight(&self) -> Vec<InFlightSnapshot> {
        self.in_flight.snapshot()
    }

    /// Dispatches one request. Never fails: errors become error responses.
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionResponse {
        let operation = request.operation.clone();
        let id = request.id;
        match self.dispatch(request).await {
            Ok(content) => {
                debug!(group = %self.name, %operation, request_id = %id, "operation succeeded");
                ExecutionResponse::success(content)
            }
            Err(error) => {
                warn!(
                    group = %self.name,
                    %operation,
                    request_id = %id,
                    kind = error.kind().as_str(),
                    %error,
                    "operation failed"
                );
                error.into_response()
            }
        }
    }

    /// Dispatches one request while tracking it for teardown.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] if [`GroupRuntime::cleanup`] ran while the call
    /// was waiting for the lock or executing.
    pub async fn execute_tracked(&self, request: ExecutionRequest) -> Result<ExecutionResponse, Cancelled> {
        let guard = self.in_flight.begin(&request.operation);
        let operation = request.operation.clone();
        tokio::select! {
            biased;
            () = guard.token().cancelled() => {
                warn!(group = %self.name, %operation, "operation cancelled");
                Err(Cancelled { operation })
            }
            response = self.execute(request) => Ok(response),
        }
    }

    /// Closes the group, cancels every tracked call and waits for them to finish.
    ///
    /// Calls arriving afterwards fail with a resource error. Returns the number
    /// of calls that were cancelled.
    pub async fn cleanup(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let cancelled = self.in_flight.cancel_all_and_drain().await;
        debug!(group = %self.name, cancelled, "group cleaned up");
        cancelled
    }

    async fn dispatch(&self, request: ExecutionRequest) -> Result<Content, OperationError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OperationError::Closed {
                group: self.name.clone(),
            });
        }

        let ExecutionRequest {
            operation,
            arguments,
            context,
            ..
        } = request;
        let descriptor = self
            .registry
            .get(&operation)
            .ok_or_else(|| OperationError::UnknownOperation {
                name: operation.clone(),
            })?;
        let info = &descriptor.info;

        let mut instance = self.lock().await?;

        let resolved = resolve_context(&self.name, info, context, self.contexts.as_ref());
        let ctx = resolved.ctx.as_deref();
        let raw = arguments.unwrap_or_default();
        let shaped = descriptor.transformer.transform(&operation, &raw, ctx)?;
        let args = match &descriptor.binder {
            Some(binder) => binder.transform(&operation, &shaped, ctx)?.into_owned(),
            None => shaped.into_owned(),
        };
        check_arguments(info, &args)?;

        let call = Call::new(
            operation,
            args,
            info.schema_param.clone(),
            resolved.ctx,
            resolved.injected,
        );
        let value = (descriptor.handler)(&mut *instance, call).await?;
        drop(instance);

        info.output
            .render(value)
            .map_err(|e| OperationError::Internal(e.into()))
    }

    async fn lock(&self) -> Result<MutexGuard<'_, G>, OperationError> {
        match self.lock_timeout {
            None => Ok(self.instance.lock().await),
            Some(limit) => tokio::time::timeout(limit, self.instance.lock())
                .await
                .map_err(|_| OperationError::Busy {
                    group: self.name.clone(),
                }),
        }
    }
}

/// Rejects missing required parameters and, unless the operation accepts
/// extras, keys that match no declared parameter.
fn check_arguments(info: &OperationInfo, args: &Arguments) -> Result<(), ValidationError> {
    let mut issues = Vec::new();
    for param in info.data_params() {
        if param.required && !args.contains_key(&param.name) {
            issues.push(FieldIssue {
                path: param.name.clone(),
                kind: IssueKind::Missing,
            });
        }
    }
    if !info.allow_extra {
        for key in args.keys() {
            if !info.data_params().any(|p| &p.name == key) {
                issues.push(FieldIssue {
                    path: key.clone(),
                    kind: IssueKind::Unexpected,
                });
            }
        }
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(info.name.clone(), issues))
    }
}
