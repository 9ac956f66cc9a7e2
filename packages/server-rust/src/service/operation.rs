//! Operation metadata, the per-call handle, and the error taxonomy.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use opdispatch_core::coerce::IssueKind;
use opdispatch_core::{
    coerce_into, Arguments, CallContext, CoerceMode, ErrorKind, ExecutionResponse, InputSchema, OutputKind,
    Schema, ValidationError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Result of an operation body.
pub type OperationResult = Result<Value, OperationError>;

/// Type-erased async operation body bound to a group instance.
pub type Handler<G> = Arc<dyn for<'a> Fn(&'a mut G, Call) -> BoxFuture<'a, OperationResult> + Send + Sync>;

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// A declared operation parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    /// Declared type name. Matched against schema names and the `Context` suffix.
    pub type_name: String,
    pub required: bool,
}

/// Immutable description of one registered operation.
#[derive(Debug, Clone)]
pub struct OperationInfo {
    /// Effective (possibly overridden) operation name.
    pub name: String,
    /// Name the operation was declared under, before overrides.
    pub member: String,
    pub description: String,
    pub params: Vec<ParamDecl>,
    pub schema: Option<Arc<Schema>>,
    /// Parameter the coerced schema value binds to.
    pub schema_param: Option<String>,
    pub requires_context: bool,
    /// Position of the context parameter in `params`, when one is declared.
    pub context_position: Option<usize>,
    pub policy: Vec<String>,
    pub output: OutputKind,
    /// Accept argument keys that match no declared parameter.
    pub allow_extra: bool,
}

impl OperationInfo {
    /// Parameters that carry caller data, i.e. everything except the context slot.
    pub fn data_params(&self) -> impl Iterator<Item = &ParamDecl> {
        self.params
            .iter()
            .enumerate()
            .filter(move |(index, _)| Some(*index) != self.context_position)
            .map(|(_, param)| param)
    }

    /// Discovery document of the declared schema, if any.
    #[must_use]
    pub fn schema_document(&self) -> Option<Value> {
        self.schema.as_ref().map(|schema| schema.document())
    }
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// Everything an operation body receives for one invocation.
#[derive(Debug, Clone)]
pub struct Call {
    operation: String,
    args: Arguments,
    binding: Option<String>,
    context: Option<Arc<dyn CallContext>>,
    context_injected: bool,
}

impl Call {
    pub(crate) fn new(
        operation: String,
        args: Arguments,
        binding: Option<String>,
        context: Option<Arc<dyn CallContext>>,
        context_injected: bool,
    ) -> Self {
        Self {
            operation,
            args,
            binding,
            context,
            context_injected,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Shaped and validated arguments.
    #[must_use]
    pub fn arguments(&self) -> &Arguments {
        &self.args
    }

    /// Deserializes a required argument.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the argument is absent or has the wrong shape.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<T, OperationError> {
        self.opt_arg(name)?.ok_or_else(|| {
            ValidationError::single(self.operation.clone(), name, IssueKind::Missing).into()
        })
    }

    /// Deserializes an optional argument. Absent and `null` both yield `None`.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the argument is present but has the wrong shape.
    pub fn opt_arg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, OperationError> {
        match self.args.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|e| {
                ValidationError::single(self.operation.clone(), name, IssueKind::Invalid(e.to_string())).into()
            }),
        }
    }

    /// The schema-bound input value.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the bound value does not deserialize into `T`.
    pub fn input<T: InputSchema>(&self) -> Result<T, OperationError> {
        match self.binding.as_deref().and_then(|key| self.args.get(key)) {
            Some(Value::Object(bound)) => Ok(coerce_into::<T>(bound, CoerceMode::Partial)?),
            _ => Ok(coerce_into::<T>(&self.args, CoerceMode::Partial)?),
        }
    }

    /// The context handed to this call, supplied or injected.
    #[must_use]
    pub fn context(&self) -> Option<&dyn CallContext> {
        self.context.as_deref()
    }

    /// Whether the context was created by the dispatcher rather than supplied.
    #[must_use]
    pub fn context_injected(&self) -> bool {
        self.context_injected
    }

    /// Emits an info message through the context, if there is one.
    pub fn info(&self, message: &str) {
        if let Some(ctx) = self.context() {
            ctx.info(message);
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Registration-time failure. The group is rejected as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("duplicate operation name '{name}' in group {group}")]
    DuplicateOperation { group: String, name: String },
    #[error("invalid operation name '{name}': names must be non-empty and must not contain '.'")]
    InvalidName { name: String },
    #[error("invalid group name '{name}': names must be non-empty and must not contain '.'")]
    InvalidGroupName { name: String },
    #[error("invalid override for operation {operation}: {field} must be {expected}")]
    InvalidOverride {
        operation: String,
        field: &'static str,
        expected: &'static str,
    },
    #[error("operation {operation} declares schema {schema} but {found} parameters have that type (expected exactly one)")]
    SchemaParameterMismatch {
        operation: String,
        schema: String,
        found: usize,
    },
    #[error("group {name} is already registered")]
    DuplicateGroup { name: String },
    #[error("no group registered for locator {locator}")]
    UnknownLocator { locator: String },
}

/// The call was cancelled during group teardown.
#[derive(Debug, Clone, thiserror::Error)]
#[error("operation {operation} was cancelled")]
pub struct Cancelled {
    pub operation: String,
}

/// A batch exceeded its shared deadline. Partial results are discarded.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", describe_timeout(.operations, .group, .deadline))]
pub struct BatchTimeout {
    pub operations: Vec<String>,
    pub group: Option<String>,
    pub deadline: Duration,
}

fn describe_timeout(operations: &[String], group: &Option<String>, deadline: &Duration) -> String {
    let secs = deadline.as_secs_f64();
    match group {
        Some(group) => format!(
            "Operations {} in group {group} timed out after {secs} seconds",
            operations.join(", ")
        ),
        None => format!("Operations {} timed out after {secs} seconds", operations.join(", ")),
    }
}

/// Per-call failure. Always converted into a response, never thrown past dispatch.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Unknown operation: {name}")]
    UnknownOperation { name: String },
    #[error("Group not found: {name}")]
    UnknownGroup { name: String },
    #[error("Invalid operation name: {name}")]
    InvalidName { name: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The body failed; the message is preserved verbatim.
    #[error("{message}")]
    Failed { message: String },
    #[error("Operation error: {0}")]
    Internal(#[from] anyhow::Error),
    #[error("Operation error: {message}")]
    Panicked { message: String },
    #[error("group {group} is busy")]
    Busy { group: String },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("group {group} is shut down")]
    Closed { group: String },
    #[error(transparent)]
    Timeout(#[from] BatchTimeout),
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl OperationError {
    /// Failure raised by an operation body.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownOperation { .. } | Self::UnknownGroup { .. } | Self::InvalidName { .. } => {
                ErrorKind::NotFound
            }
            Self::Validation(_) => ErrorKind::Validation,
            Self::Failed { .. } | Self::Internal(_) | Self::Panicked { .. } => ErrorKind::Operation,
            Self::Busy { .. } | Self::Overloaded | Self::Closed { .. } => ErrorKind::Resource,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }

    #[must_use]
    pub fn into_response(self) -> ExecutionResponse {
        ExecutionResponse::failure(self.kind(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use opdispatch_core::{FieldDef, RecordingContext};
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> Call {
        let Value::Object(args) = args else {
            panic!("expected object");
        };
        Call::new("echo".into(), args, None, None, false)
    }

    #[test]
    fn arg_reports_missing_as_validation() {
        let err = call(json!({})).arg::<String>("text").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.to_string(), "validation failed for echo: text: field required");
    }

    #[test]
    fn opt_arg_treats_null_as_absent() {
        let c = call(json!({"limit": null}));
        assert_eq!(c.opt_arg::<u32>("limit").unwrap(), None);
        assert!(c.opt_arg::<u32>("missing").unwrap().is_none());
        assert!(call(json!({"limit": "x"})).opt_arg::<u32>("limit").is_err());
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Person {
        name: String,
    }

    impl InputSchema for Person {
        fn schema() -> Schema {
            Schema::new("Person").field(FieldDef::string("name"))
        }
    }

    #[test]
    fn input_reads_bound_value() {
        let Value::Object(args) = json!({"person": {"name": "Jane"}}) else {
            unreachable!()
        };
        let c = Call::new("greet".into(), args, Some("person".into()), None, false);
        assert_eq!(c.input::<Person>().unwrap(), Person { name: "Jane".into() });
    }

    #[test]
    fn input_ignores_undeclared_bound_keys() {
        let Value::Object(args) = json!({"person": {"name": "Jane", "nickname": "J"}}) else {
            unreachable!()
        };
        let c = Call::new("greet".into(), args, Some("person".into()), None, false);
        assert_eq!(c.input::<Person>().unwrap(), Person { name: "Jane".into() });
    }

    #[test]
    fn info_forwards_to_context() {
        let ctx = Arc::new(RecordingContext::new());
        let c = Call::new("op".into(), Arguments::new(), None, Some(ctx.clone()), true);
        c.info("hello");
        assert!(c.context_injected());
        assert_eq!(ctx.messages(), vec!["hello"]);
    }

    #[test]
    fn error_kinds_and_messages() {
        assert_eq!(
            OperationError::UnknownOperation { name: "nope".into() }.to_string(),
            "Unknown operation: nope"
        );
        assert_eq!(OperationError::Overloaded.kind(), ErrorKind::Resource);
        assert_eq!(OperationError::failed("bad").to_string(), "bad");
        assert_eq!(
            OperationError::Panicked { message: "boom".into() }.to_string(),
            "Operation error: boom"
        );
    }

    #[test]
    fn batch_timeout_message() {
        let timeout = BatchTimeout {
            operations: vec!["sleep".into(), "echo".into()],
            group: Some("timeout".into()),
            deadline: Duration::from_millis(200),
        };
        assert_eq!(
            timeout.to_string(),
            "Operations sleep, echo in group timeout timed out after 0.2 seconds"
        );
        let err: OperationError = timeout.into();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }
}
