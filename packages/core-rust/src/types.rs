use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped keyword arguments supplied by a caller.
///
/// Every transformer and coercer operates on this shape. `serde_json::Map`
/// keeps the value model identical to what transports decode off the wire.
pub type Arguments = serde_json::Map<String, Value>;

/// Result payload of a single operation.
///
/// Closed tagged union: the variant is decided once per operation at
/// registration time (see [`OutputKind`]), never sniffed per return value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    /// Plain text.
    Text { text: String },
    /// A structured JSON document.
    Structured { data: Value },
    /// Opaque bytes.
    Binary {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
}

impl Content {
    /// Shorthand for a `Text` payload.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Renders the payload as text for aggregation and display.
    ///
    /// Structured data becomes compact JSON, binary data becomes standard base64.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Structured { data } => data.to_string(),
            Self::Binary { data } => base64::engine::general_purpose::STANDARD.encode(data),
        }
    }

    /// Returns the text if this is a `Text` payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::text(String::new())
    }
}

/// How an operation's return value is normalized into [`Content`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Strings verbatim, other scalars by their text form, sequences and
    /// mappings as serialized JSON text.
    #[default]
    Text,
    /// The JSON value as-is.
    Structured,
    /// `MsgPack` encoding of the JSON value.
    Binary,
}

impl OutputKind {
    /// Normalizes an operation return value into content of this kind.
    ///
    /// # Errors
    ///
    /// Returns an error only for `Binary` when `MsgPack` encoding fails.
    pub fn render(self, value: Value) -> Result<Content, rmp_serde::encode::Error> {
        match self {
            Self::Text => Ok(Content::text(value_to_text(value))),
            Self::Structured => Ok(Content::Structured { data: value }),
            Self::Binary => Ok(Content::Binary {
                data: rmp_serde::to_vec_named(&value)?,
            }),
        }
    }
}

/// Text form of a JSON value: strings unquoted, null empty, everything else JSON.
#[must_use]
pub fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Human-readable JSON kind name, used in validation messages.
#[must_use]
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Classification attached to every failed response.
///
/// Lets callers tell bad input apart from internal failure without parsing
/// error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown group or operation name.
    NotFound,
    /// Caller input failed schema or parameter validation.
    Validation,
    /// The operation body failed.
    Operation,
    /// Group busy, shut down, or the host is overloaded.
    Resource,
    /// Batch deadline exceeded.
    Timeout,
    /// The call was cancelled during group teardown.
    Cancelled,
}

impl ErrorKind {
    /// Stable lowercase label, used as a metrics/tracing field value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Operation => "operation",
            Self::Resource => "resource",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_output_keeps_strings_verbatim() {
        let content = OutputKind::Text.render(json!("Echo: hi")).unwrap();
        assert_eq!(content, Content::text("Echo: hi"));
    }

    #[test]
    fn text_output_serializes_collections_and_scalars() {
        assert_eq!(
            OutputKind::Text.render(json!(["a", "b"])).unwrap().to_text(),
            r#"["a","b"]"#
        );
        assert_eq!(OutputKind::Text.render(json!(42)).unwrap().to_text(), "42");
        assert_eq!(OutputKind::Text.render(json!(true)).unwrap().to_text(), "true");
        assert_eq!(OutputKind::Text.render(Value::Null).unwrap().to_text(), "");
    }

    #[test]
    fn structured_output_keeps_the_document() {
        let content = OutputKind::Structured.render(json!({"count": 1})).unwrap();
        assert_eq!(content, Content::Structured { data: json!({"count": 1}) });
        assert_eq!(content.to_text(), r#"{"count":1}"#);
    }

    #[test]
    fn binary_output_is_msgpack() {
        let content = OutputKind::Binary.render(json!({"a": 1})).unwrap();
        let Content::Binary { data } = &content else {
            panic!("expected binary content");
        };
        let decoded: Value = rmp_serde::from_slice(data).unwrap();
        assert_eq!(decoded, json!({"a": 1}));
        assert!(content.as_text().is_none());
    }

    #[test]
    fn content_serializes_with_type_tag() {
        let json = serde_json::to_value(Content::text("x")).unwrap();
        assert_eq!(json, json!({"type": "text", "text": "x"}));
    }

    #[test]
    fn kind_names_distinguish_integers_and_numbers() {
        assert_eq!(kind_name(&json!(1)), "integer");
        assert_eq!(kind_name(&json!(1.5)), "number");
        assert_eq!(kind_name(&json!({})), "object");
    }
}
