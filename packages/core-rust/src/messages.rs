//! Request and response types exchanged with the dispatch engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::traits::CallContext;
use crate::types::{Arguments, Content, ErrorKind};

/// A context value supplied by the caller instead of an injected default.
#[derive(Debug, Clone)]
pub enum SuppliedContext {
    /// Passed by keyword, under the context parameter's name.
    Keyword(Arc<dyn CallContext>),
    /// Passed at a positional slot. Only counts when `index` is the slot the
    /// operation declares its context parameter at.
    Positional { index: usize, ctx: Arc<dyn CallContext> },
}

impl SuppliedContext {
    #[must_use]
    pub fn context(&self) -> &Arc<dyn CallContext> {
        match self {
            Self::Keyword(ctx) | Self::Positional { ctx, .. } => ctx,
        }
    }
}

/// One call against a single group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub operation: String,
    #[serde(default)]
    pub arguments: Option<Arguments>,
    #[serde(skip)]
    pub context: Option<SuppliedContext>,
}

impl ExecutionRequest {
    pub fn new(operation: impl Into<String>, arguments: Option<Arguments>) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation: operation.into(),
            arguments,
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: SuppliedContext) -> Self {
        self.context = Some(context);
        self
    }
}

/// Outcome of one [`ExecutionRequest`].
///
/// Failures carry their message in `error` and also echo it as text content,
/// so a transport that only renders content still shows what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ExecutionResponse {
    #[must_use]
    pub fn success(content: Content) -> Self {
        Self {
            content,
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: Content::text(message.clone()),
            error: Some(message),
            error_kind: Some(kind),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A batch of requests against one group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub requests: Vec<ExecutionRequest>,
}

/// Aggregate of a batch of [`ExecutionResponse`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub content: Content,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ServiceResponse {
    /// Joins successful contents with newlines and collects error strings,
    /// both in submission order. Failed items contribute only their error.
    pub fn aggregate(responses: impl IntoIterator<Item = ExecutionResponse>) -> Self {
        let mut texts = Vec::new();
        let mut errors = Vec::new();
        for response in responses {
            match response.error {
                Some(error) => errors.push(error),
                None => texts.push(response.content.to_text()),
            }
        }
        Self {
            content: Content::text(texts.join("\n")),
            errors,
        }
    }

    /// A response that failed as a whole.
    pub fn failed(content: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            content: Content::text(content),
            errors: vec![error.into()],
        }
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A call addressed by qualified `group.operation` name.
#[derive(Debug, Clone)]
pub struct QualifiedCall {
    pub name: String,
    pub arguments: Option<Arguments>,
    pub context: Option<SuppliedContext>,
}

impl QualifiedCall {
    pub fn new(name: impl Into<String>, arguments: Option<Arguments>) -> Self {
        Self {
            name: name.into(),
            arguments,
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: SuppliedContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Splits the name on the first `.` into `(group, operation)`.
    #[must_use]
    pub fn split(&self) -> Option<(&str, &str)> {
        split_qualified(&self.name)
    }
}

/// Splits `group.operation` on the first `.`. Both halves must be non-empty.
#[must_use]
pub fn split_qualified(name: &str) -> Option<(&str, &str)> {
    name.split_once('.')
        .filter(|(group, operation)| !group.is_empty() && !operation.is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn split_uses_first_separator() {
        assert_eq!(split_qualified("example.echo"), Some(("example", "echo")));
        assert_eq!(split_qualified("a.b.c"), Some(("a", "b.c")));
        assert_eq!(split_qualified("noseparator"), None);
        assert_eq!(split_qualified(".echo"), None);
        assert_eq!(split_qualified("example."), None);
    }

    #[test]
    fn aggregate_preserves_submission_order() {
        let response = ServiceResponse::aggregate(vec![
            ExecutionResponse::success(Content::text("one")),
            ExecutionResponse::failure(ErrorKind::Operation, "boom"),
            ExecutionResponse::success(Content::text("three")),
        ]);
        assert_eq!(response.content, Content::text("one\nthree"));
        assert_eq!(response.errors, vec!["boom"]);
    }

    #[test]
    fn failure_echoes_message_as_content() {
        let response = ExecutionResponse::failure(ErrorKind::NotFound, "Unknown operation: nope");
        assert!(response.is_error());
        assert_eq!(response.content.as_text(), Some("Unknown operation: nope"));
        assert_eq!(response.error_kind, Some(ErrorKind::NotFound));
    }

    #[test]
    fn empty_errors_are_omitted_from_json() {
        let json = serde_json::to_value(ServiceResponse::aggregate(vec![ExecutionResponse::success(
            Content::text("ok"),
        )]))
        .unwrap();
        assert_eq!(json, json!({"content": {"type": "text", "text": "ok"}}));
    }

    #[test]
    fn request_deserializes_without_id() {
        let request: ExecutionRequest =
            serde_json::from_value(json!({"operation": "echo", "arguments": {"text": "hi"}})).unwrap();
        assert_eq!(request.operation, "echo");
        assert!(request.context.is_none());
        assert_eq!(request.arguments.unwrap()["text"], "hi");
    }
}
