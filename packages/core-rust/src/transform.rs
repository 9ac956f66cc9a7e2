//! Parameter transformers.
//!
//! Each strategy reshapes raw caller arguments into the shape an operation
//! expects. Operations stay agnostic to how a caller namespaces its arguments;
//! the registry attaches whichever strategy each operation needs.

use std::borrow::Cow;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::coerce::{coerce, CoerceMode, ValidationError};
use crate::schema::Schema;
use crate::traits::{CallContext, InputSchema, ParameterTransformer};
use crate::types::Arguments;

// ---------------------------------------------------------------------------
// Flat
// ---------------------------------------------------------------------------

/// Identity passthrough for arguments that already match the parameter names.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flat;

impl ParameterTransformer for Flat {
    fn transform<'a>(
        &self,
        _operation: &str,
        args: &'a Arguments,
        _ctx: Option<&dyn CallContext>,
    ) -> Result<Cow<'a, Arguments>, ValidationError> {
        Ok(Cow::Borrowed(args))
    }
}

// ---------------------------------------------------------------------------
// Nested
// ---------------------------------------------------------------------------

/// Unwraps arguments namespaced under the operation name.
///
/// `{"echo": {"text": "hi"}}` becomes `{"text": "hi"}` for operation `echo`.
/// Anything else passes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Nested;

impl ParameterTransformer for Nested {
    fn transform<'a>(
        &self,
        operation: &str,
        args: &'a Arguments,
        _ctx: Option<&dyn CallContext>,
    ) -> Result<Cow<'a, Arguments>, ValidationError> {
        match args.get(operation) {
            Some(Value::Object(inner)) => Ok(Cow::Owned(inner.clone())),
            _ => Ok(Cow::Borrowed(args)),
        }
    }
}

// ---------------------------------------------------------------------------
// SchemaBound
// ---------------------------------------------------------------------------

/// Coerces arguments into a schema and binds the result under one key.
///
/// Accepts two shapes:
/// - nested: `args[binding_key]` is an object, which is coerced in place and
///   sibling keys are left untouched;
/// - flat: some top-level keys are declared schema fields, which are pulled
///   out, coerced, and bound under `binding_key` next to the remaining keys.
///
/// When neither shape matches the input is returned unchanged.
#[derive(Debug, Clone)]
pub struct SchemaBound {
    schema: Arc<Schema>,
    binding_key: String,
}

impl SchemaBound {
    pub fn new(schema: Arc<Schema>, binding_key: impl Into<String>) -> Self {
        Self {
            schema,
            binding_key: binding_key.into(),
        }
    }

    /// Binds `T`'s schema under its default key (the lowercased schema name).
    #[must_use]
    pub fn for_schema<T: InputSchema>() -> Self {
        let schema = T::schema();
        let binding_key = schema.default_binding_key();
        Self::new(Arc::new(schema), binding_key)
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn binding_key(&self) -> &str {
        &self.binding_key
    }
}

impl ParameterTransformer for SchemaBound {
    fn transform<'a>(
        &self,
        _operation: &str,
        args: &'a Arguments,
        _ctx: Option<&dyn CallContext>,
    ) -> Result<Cow<'a, Arguments>, ValidationError> {
        if let Some(Value::Object(inner)) = args.get(&self.binding_key) {
            let coerced = coerce(&self.schema, inner, CoerceMode::Partial)?;
            if coerced == *inner {
                return Ok(Cow::Borrowed(args));
            }
            let mut out = args.clone();
            out.insert(self.binding_key.clone(), Value::Object(coerced));
            return Ok(Cow::Owned(out));
        }

        if !args.keys().any(|k| self.schema.has_field(k)) {
            return Ok(Cow::Borrowed(args));
        }

        let (declared, mut rest): (Arguments, Arguments) = args
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(k, _)| self.schema.has_field(k));
        let coerced = coerce(&self.schema, &declared, CoerceMode::Strict)?;
        rest.insert(self.binding_key.clone(), Value::Object(coerced));
        Ok(Cow::Owned(rest))
    }
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// Tries each child in order and keeps the first output that differs from
/// the input.
///
/// Children see the original input, not each other's output. A child error is
/// logged and skipped; when nothing changes the input comes back as-is and the
/// dispatcher reports any mismatch further downstream.
#[derive(Debug, Clone, Default)]
pub struct Composite {
    children: Vec<Arc<dyn ParameterTransformer>>,
}

impl Composite {
    #[must_use]
    pub fn new(children: Vec<Arc<dyn ParameterTransformer>>) -> Self {
        Self { children }
    }

    /// Appends a child transformer.
    #[must_use]
    pub fn with(mut self, child: impl ParameterTransformer + 'static) -> Self {
        self.children.push(Arc::new(child));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl ParameterTransformer for Composite {
    fn transform<'a>(
        &self,
        operation: &str,
        args: &'a Arguments,
        ctx: Option<&dyn CallContext>,
    ) -> Result<Cow<'a, Arguments>, ValidationError> {
        for (index, child) in self.children.iter().enumerate() {
            match child.transform(operation, args, ctx) {
                Ok(Cow::Owned(out)) if out != *args => return Ok(Cow::Owned(out)),
                Ok(_) => {}
                Err(error) => {
                    debug!(operation, child = index, %error, "transformer rejected arguments, trying next");
                }
            }
        }
        Ok(Cow::Borrowed(args))
    }
}
