//! Context injection.
//!
//! An operation that requires a context gets a fresh one from the group's
//! [`ContextFactory`] unless the caller supplied one, either by keyword or
//! positionally at the operation's declared context slot. A positional value
//! at any other slot does not count as supplied.

use std::sync::Arc;

use opdispatch_core::{CallContext, ContextFactory, SuppliedContext};

use super::operation::OperationInfo;

/// Context resolved for one call.
#[derive(Debug, Default)]
pub struct ResolvedContext {
    pub ctx: Option<Arc<dyn CallContext>>,
    pub injected: bool,
}

/// Whether `supplied` fills the context slot of `info`.
#[must_use]
pub fn is_supplied(info: &OperationInfo, supplied: Option<&SuppliedContext>) -> bool {
    match supplied {
        Some(SuppliedContext::Keyword(_)) => true,
        Some(SuppliedContext::Positional { index, .. }) => info.context_position == Some(*index),
        None => false,
    }
}

/// Whether the dispatcher must create a default context for this call.
#[must_use]
pub fn should_inject(info: &OperationInfo, supplied: Option<&SuppliedContext>) -> bool {
    info.requires_context && !is_supplied(info, supplied)
}

/// Picks the context for a call: the supplied one if it fills the slot, a
/// fresh one from `factory` if the operation needs one, otherwise none.
pub fn resolve_context(
    group: &str,
    info: &OperationInfo,
    supplied: Option<SuppliedContext>,
    factory: &dyn ContextFactory,
) -> ResolvedContext {
    if is_supplied(info, supplied.as_ref()) {
        return ResolvedContext {
            ctx: supplied.map(|s| Arc::clone(s.context())),
            injected: false,
        };
    }
    if info.requires_context {
        return ResolvedContext {
            ctx: Some(factory.create(group, &info.name)),
            injected: true,
        };
    }
    ResolvedContext::default()
}
