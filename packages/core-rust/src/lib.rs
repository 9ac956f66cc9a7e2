//! `opdispatch` core: value model, schemas and coercion, parameter
//! transformers, call contexts and request/response types.

pub mod coerce;
pub mod context;
pub mod messages;
pub mod schema;
pub mod traits;
pub mod transform;
pub mod types;

pub use coerce::{coerce, coerce_into, CoerceMode, FieldIssue, IssueKind, ValidationError};
pub use context::{RecordingContext, RecordingContextFactory, TracingContext, TracingContextFactory};
pub use messages::{
    split_qualified, ExecutionRequest, ExecutionResponse, QualifiedCall, ServiceRequest, ServiceResponse,
    SuppliedContext,
};
pub use schema::{Constraint, FieldDef, FieldKind, Schema};
pub use traits::{CallContext, ContextFactory, InputSchema, ParameterTransformer};
pub use transform::{Composite, Flat, Nested, SchemaBound};
pub use types::{Arguments, Content, ErrorKind, OutputKind};
