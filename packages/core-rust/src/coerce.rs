//! Schema coercion: untyped argument maps into values shaped by a [`Schema`].
//!
//! Coercion is a pure function. It collects every issue it finds instead of
//! stopping at the first one, and each issue carries the dotted/indexed path of
//! the offending field (`parent.child[2]`).

use std::fmt;

use serde_json::{Number, Value};

use crate::schema::{Constraint, FieldDef, FieldKind, Schema};
use crate::traits::InputSchema;
use crate::types::{kind_name, Arguments};

/// How unknown keys are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoerceMode {
    /// Unknown keys are reported as issues.
    #[default]
    Strict,
    /// Required fields are still enforced; unknown keys are ignored and not copied.
    Partial,
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldIssue {
    /// Path of the offending field; empty for whole-value issues.
    pub path: String,
    pub kind: IssueKind,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.path, self.kind)
        }
    }
}

/// What went wrong with a field.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    /// A required field is absent.
    Missing,
    /// The value has the wrong primitive kind.
    WrongType { expected: String, found: &'static str },
    /// A declared numeric, length or pattern constraint was violated.
    Constraint(String),
    /// A key that the schema (or parameter list) does not declare.
    Unexpected,
    /// Anything else, with a message.
    Invalid(String),
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("field required"),
            Self::WrongType { expected, found } => write!(f, "expected {expected}, got {found}"),
            Self::Constraint(message) | Self::Invalid(message) => f.write_str(message),
            Self::Unexpected => f.write_str("unexpected field"),
        }
    }
}

/// Caller input does not satisfy a declared schema or parameter list.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("validation failed for {scope}: {}", render_issues(.issues))]
pub struct ValidationError {
    /// Schema name or operation name the issues belong to.
    pub scope: String,
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn new(scope: impl Into<String>, issues: Vec<FieldIssue>) -> Self {
        Self {
            scope: scope.into(),
            issues,
        }
    }

    /// A validation error carrying exactly one issue.
    pub fn single(scope: impl Into<String>, path: impl Into<String>, kind: IssueKind) -> Self {
        Self::new(
            scope,
            vec![FieldIssue {
                path: path.into(),
                kind,
            }],
        )
    }

    /// Paths of all issues, in the order they were found.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.issues.iter().map(|i| i.path.as_str())
    }
}

fn render_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Coerces `raw` into the shape declared by `schema`.
///
/// The returned map contains exactly the declared fields that were present or
/// defaulted, with primitive values coerced to their declared kinds.
///
/// # Errors
///
/// Returns a [`ValidationError`] listing every missing field, kind mismatch,
/// violated constraint and (in strict mode) unknown key.
pub fn coerce(schema: &Schema, raw: &Arguments, mode: CoerceMode) -> Result<Arguments, ValidationError> {
    let mut issues = Vec::new();
    let out = coerce_object(schema, raw, mode, "", &mut issues);
    if issues.is_empty() {
        Ok(out)
    } else {
        Err(ValidationError::new(schema.name.clone(), issues))
    }
}

/// Coerces `raw` against `T`'s schema, then deserializes the result into `T`.
///
/// # Errors
///
/// Returns a [`ValidationError`] if coercion fails or the coerced value does
/// not deserialize into `T`.
pub fn coerce_into<T: InputSchema>(raw: &Arguments, mode: CoerceMode) -> Result<T, ValidationError> {
    let schema = T::schema();
    let coerced = coerce(&schema, raw, mode)?;
    serde_json::from_value(Value::Object(coerced))
        .map_err(|e| ValidationError::single(schema.name, "", IssueKind::Invalid(e.to_string())))
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn coerce_object(
    schema: &Schema,
    raw: &Arguments,
    mode: CoerceMode,
    prefix: &str,
    issues: &mut Vec<FieldIssue>,
) -> Arguments {
    let mut out = Arguments::new();

    for field in &schema.fields {
        let path = join(prefix, &field.name);
        match raw.get(&field.name) {
            Some(value) => {
                if let Some(coerced) = coerce_field(field, value, mode, &path, issues) {
                    out.insert(field.name.clone(), coerced);
                }
            }
            None => {
                if let Some(default) = &field.default {
                    out.insert(field.name.clone(), default.clone());
                } else if field.required {
                    issues.push(FieldIssue {
                        path,
                        kind: IssueKind::Missing,
                    });
                }
            }
        }
    }

    if mode == CoerceMode::Strict {
        for key in raw.keys().filter(|k| !schema.has_field(k)) {
            issues.push(FieldIssue {
                path: join(prefix, key),
                kind: IssueKind::Unexpected,
            });
        }
    }

    out
}

fn coerce_field(
    field: &FieldDef,
    value: &Value,
    mode: CoerceMode,
    path: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<Value> {
    if value.is_null() {
        if field.nullable {
            return Some(Value::Null);
        }
        issues.push(FieldIssue {
            path: path.to_string(),
            kind: IssueKind::WrongType {
                expected: field.kind.to_string(),
                found: "null",
            },
        });
        return None;
    }

    let coerced = coerce_kind(&field.kind, value, mode, path, issues)?;
    let before = issues.len();
    check_constraints(&field.constraints, &coerced, path, issues);
    (issues.len() == before).then_some(coerced)
}

fn coerce_kind(
    kind: &FieldKind,
    value: &Value,
    mode: CoerceMode,
    path: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<Value> {
    let coerced = match kind {
        FieldKind::String => value.as_str().map(|s| Value::String(s.to_string())),
        FieldKind::Integer => as_integer(value),
        FieldKind::Number => as_number(value),
        FieldKind::Boolean => as_boolean(value),
        FieldKind::Any => Some(value.clone()),
        FieldKind::Array(items) => {
            if let Some(elements) = value.as_array() {
                let before = issues.len();
                let mut out = Vec::with_capacity(elements.len());
                for (index, element) in elements.iter().enumerate() {
                    let element_path = format!("{path}[{index}]");
                    if element.is_null() {
                        issues.push(FieldIssue {
                            path: element_path,
                            kind: IssueKind::WrongType {
                                expected: items.to_string(),
                                found: "null",
                            },
                        });
                        continue;
                    }
                    if let Some(v) = coerce_kind(items, element, mode, &element_path, issues) {
                        out.push(v);
                    }
                }
                return (issues.len() == before).then_some(Value::Array(out));
            }
            None
        }
        FieldKind::Object(schema) => {
            if let Some(map) = value.as_object() {
                let before = issues.len();
                let out = coerce_object(schema, map, mode, path, issues);
                return (issues.len() == before).then_some(Value::Object(out));
            }
            None
        }
    };

    if coerced.is_none() {
        issues.push(FieldIssue {
            path: path.to_string(),
            kind: IssueKind::WrongType {
                expected: kind.to_string(),
                found: kind_name(value),
            },
        });
    }
    coerced
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn as_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(Value::Number(n.clone())),
        Value::Number(n) => {
            let f = n.as_f64()?;
            let whole = f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64;
            whole.then(|| Value::from(f as i64))
        }
        Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => Some(Value::Number(n.clone())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}

fn as_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(b) => Some(Value::Bool(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(Value::Bool(false)),
            Some(1) => Some(Value::Bool(true)),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn check_constraints(constraints: &[Constraint], value: &Value, path: &str, issues: &mut Vec<FieldIssue>) {
    for constraint in constraints {
        let violation = match constraint {
            Constraint::Min(min) => value
                .as_f64()
                .filter(|v| v < min)
                .map(|_| format!("must be greater than or equal to {min}")),
            Constraint::Max(max) => value
                .as_f64()
                .filter(|v| v > max)
                .map(|_| format!("must be less than or equal to {max}")),
            Constraint::MinLength(min) => length_of(value)
                .filter(|len| len < min)
                .map(|_| format!("length must be at least {min}")),
            Constraint::MaxLength(max) => length_of(value)
                .filter(|len| len > max)
                .map(|_| format!("length must be at most {max}")),
            Constraint::Pattern(re) => value
                .as_str()
                .filter(|s| !re.is_match(s))
                .map(|_| format!("must match pattern '{}'", re.as_str())),
        };
        if let Some(message) = violation {
            issues.push(FieldIssue {
                path: path.to_string(),
                kind: IssueKind::Constraint(message),
            });
        }
    }
}

fn length_of(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(a) => Some(a.len()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => panic!("test arguments must be an object"),
        }
    }

    fn message_schema() -> Schema {
        Schema::new("MessageSchema")
            .field(FieldDef::string("text"))
            .field(FieldDef::integer("repeat").default_value(json!(1)).min(1.0).max(10.0))
    }

    #[test]
    fn fills_defaults_for_absent_optional_fields() {
        let out = coerce(&message_schema(), &args(json!({"text": "hi"})), CoerceMode::Strict).unwrap();
        assert_eq!(Value::Object(out), json!({"text": "hi", "repeat": 1}));
    }

    #[test]
    fn reports_missing_required_field() {
        let err = coerce(&message_schema(), &args(json!({"repeat": 2})), CoerceMode::Strict).unwrap_err();
        assert_eq!(err.scope, "MessageSchema");
        assert_eq!(err.issues, vec![FieldIssue { path: "text".into(), kind: IssueKind::Missing }]);
        assert_eq!(err.to_string(), "validation failed for MessageSchema: text: field required");
    }

    #[test]
    fn reports_wrong_primitive_kind() {
        let err = coerce(&message_schema(), &args(json!({"text": 5})), CoerceMode::Strict).unwrap_err();
        assert!(matches!(
            &err.issues[0].kind,
            IssueKind::WrongType { expected, found: "integer" } if expected == "string"
        ));
    }

    #[test]
    fn enforces_numeric_bounds() {
        let err = coerce(
            &message_schema(),
            &args(json!({"text": "x", "repeat": 11})),
            CoerceMode::Strict,
        )
        .unwrap_err();
        assert_eq!(err.issues[0].path, "repeat");
        assert_eq!(
            err.issues[0].kind,
            IssueKind::Constraint("must be less than or equal to 10".into())
        );
    }

    #[test]
    fn lax_coercion_of_numeric_strings_and_whole_floats() {
        let out = coerce(
            &message_schema(),
            &args(json!({"text": "x", "repeat": "3"})),
            CoerceMode::Strict,
        )
        .unwrap();
        assert_eq!(out["repeat"], json!(3));

        let out = coerce(
            &message_schema(),
            &args(json!({"text": "x", "repeat": 4.0})),
            CoerceMode::Strict,
        )
        .unwrap();
        assert_eq!(out["repeat"], json!(4));

        let err = coerce(
            &message_schema(),
            &args(json!({"text": "x", "repeat": 4.5})),
            CoerceMode::Strict,
        )
        .unwrap_err();
        assert_eq!(err.issues[0].path, "repeat");
    }

    #[test]
    fn whole_floats_beyond_i64_are_rejected() {
        let schema = Schema::new("AgeSchema").field(FieldDef::integer("age"));
        let err = coerce(&schema, &args(json!({"age": 9223372036854775808.0})), CoerceMode::Strict).unwrap_err();
        assert_eq!(err.issues[0].path, "age");
        assert!(matches!(&err.issues[0].kind, IssueKind::WrongType { expected, .. } if expected == "integer"));

        let out = coerce(&schema, &args(json!({"age": -9223372036854775808.0})), CoerceMode::Strict).unwrap();
        assert_eq!(out["age"], json!(i64::MIN));
    }

    #[test]
    fn strict_mode_rejects_unknown_keys() {
        let err = coerce(
            &message_schema(),
            &args(json!({"text": "x", "colour": "red"})),
            CoerceMode::Strict,
        )
        .unwrap_err();
        assert_eq!(err.issues, vec![FieldIssue { path: "colour".into(), kind: IssueKind::Unexpected }]);
    }

    #[test]
    fn partial_mode_ignores_unknown_keys_but_enforces_required() {
        let out = coerce(
            &message_schema(),
            &args(json!({"text": "x", "colour": "red"})),
            CoerceMode::Partial,
        )
        .unwrap();
        assert!(!out.contains_key("colour"));

        let err = coerce(&message_schema(), &args(json!({"colour": "red"})), CoerceMode::Partial).unwrap_err();
        assert_eq!(err.issues[0].kind, IssueKind::Missing);
    }

    #[test]
    fn nested_paths_include_parent_and_index() {
        let schema = Schema::new("Order").field(FieldDef::array(
            "lines",
            FieldKind::Object(std::sync::Arc::new(
                Schema::new("Line")
                    .field(FieldDef::string("sku"))
                    .field(FieldDef::integer("qty").min(1.0)),
            )),
        ));
        let err = coerce(
            &schema,
            &args(json!({"lines": [{"sku": "a", "qty": 1}, {"sku": "b", "qty": 0}, {"qty": 2}]})),
            CoerceMode::Strict,
        )
        .unwrap_err();
        let paths: Vec<_> = err.paths().collect();
        assert_eq!(paths, vec!["lines[1].qty", "lines[2].sku"]);
    }

    #[test]
    fn length_and_pattern_constraints() {
        let schema = Schema::new("Tagged")
            .field(FieldDef::string("code").pattern(Regex::new("^[A-Z]{3}$").unwrap()))
            .field(FieldDef::array("tags", FieldKind::String).min_length(1));
        let err = coerce(&schema, &args(json!({"code": "abc", "tags": []})), CoerceMode::Strict).unwrap_err();
        assert_eq!(err.issues.len(), 2);
        assert_eq!(
            err.issues[0].kind,
            IssueKind::Constraint("must match pattern '^[A-Z]{3}$'".into())
        );
        assert_eq!(err.issues[1].kind, IssueKind::Constraint("length must be at least 1".into()));
    }

    #[test]
    fn null_only_accepted_when_nullable() {
        let schema = Schema::new("S")
            .field(FieldDef::string("a").nullable())
            .field(FieldDef::string("b"));
        let err = coerce(&schema, &args(json!({"a": null, "b": null})), CoerceMode::Strict).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert_eq!(err.issues[0].path, "b");
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Message {
        text: String,
        repeat: i64,
    }

    impl InputSchema for Message {
        fn schema() -> Schema {
            message_schema()
        }
    }

    #[test]
    fn coerce_into_typed_value() {
        let msg: Message = coerce_into(&args(json!({"text": "hey", "repeat": "2"})), CoerceMode::Strict).unwrap();
        assert_eq!(msg, Message { text: "hey".into(), repeat: 2 });
    }
}
