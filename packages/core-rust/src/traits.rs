use std::borrow::Cow;
use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::coerce::ValidationError;
use crate::schema::Schema;
use crate::types::Arguments;

/// Per-call capability handed to operations that ask for one.
///
/// Operations use it to emit informational messages and report progress. The
/// dispatcher never inspects it beyond passing it through.
pub trait CallContext: Send + Sync + Debug {
    /// Emits an informational message.
    fn info(&self, message: &str);

    /// Reports progress as `current` out of `total`.
    fn report_progress(&self, current: u64, total: u64);

    /// Identifier of the request this context belongs to, if the transport supplied one.
    fn request_id(&self) -> Option<&str> {
        None
    }
}

/// Creates a fresh [`CallContext`] for one call.
pub trait ContextFactory: Send + Sync + Debug {
    fn create(&self, group: &str, operation: &str) -> Arc<dyn CallContext>;
}

/// Reshapes raw caller arguments before validation.
///
/// Implementations return `Cow::Borrowed` when the input needs no change, so
/// the common passthrough path never clones the argument map.
pub trait ParameterTransformer: Send + Sync + Debug {
    /// Transforms `args` for `operation`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when the arguments are recognizably aimed
    /// at this transformer's shape but fail validation.
    fn transform<'a>(
        &self,
        operation: &str,
        args: &'a Arguments,
        ctx: Option<&dyn CallContext>,
    ) -> Result<Cow<'a, Arguments>, ValidationError>;
}

/// A typed operation input with a declared [`Schema`].
///
/// Implementors deserialize from the coerced argument map, so the serde field
/// names must match the schema's field names.
pub trait InputSchema: DeserializeOwned + Send + 'static {
    fn schema() -> Schema;
}
