use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Map, Value};

/// Declared input shape of an operation.
///
/// A schema is a named set of typed fields. The name doubles as the type name
/// a schema-bound parameter is annotated with, which is how registration finds
/// the parameter a coerced value binds to.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Type name of the schema (e.g. `PersonSchema`).
    pub name: String,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
}

impl Schema {
    /// Creates an empty schema with the given type name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Appends a field definition.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` is a declared field.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterates the declared field names.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Default binding key for a schema-bound parameter: the lowercased type name.
    #[must_use]
    pub fn default_binding_key(&self) -> String {
        self.name.to_lowercase()
    }

    /// Structured description of this schema for external discovery tooling.
    ///
    /// The shape follows JSON Schema closely enough for renderers that expect
    /// `title`/`type`/`properties`/`required`.
    #[must_use]
    pub fn document(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            properties.insert(field.name.clone(), field.document());
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }

        let mut doc = Map::new();
        doc.insert("title".into(), Value::String(self.name.clone()));
        doc.insert("type".into(), Value::String("object".into()));
        if let Some(description) = &self.description {
            doc.insert("description".into(), Value::String(description.clone()));
        }
        doc.insert("properties".into(), Value::Object(properties));
        doc.insert("required".into(), Value::Array(required));
        Value::Object(doc)
    }
}

/// Single field definition within a schema.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    /// Expected value kind.
    pub kind: FieldKind,
    /// Whether the field must be present.
    pub required: bool,
    /// Whether an explicit `null` is accepted.
    pub nullable: bool,
    /// Value filled in when the field is absent.
    pub default: Option<Value>,
    /// Optional human-readable description.
    pub description: Option<String>,
    /// Numeric, length and pattern constraints.
    pub constraints: Vec<Constraint>,
}

impl FieldDef {
    /// Creates a required field of the given kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            nullable: false,
            default: None,
            description: None,
            constraints: Vec::new(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn array(name: impl Into<String>, items: FieldKind) -> Self {
        Self::new(name, FieldKind::Array(Box::new(items)))
    }

    pub fn object(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, FieldKind::Object(Arc::new(schema)))
    }

    /// Marks the field as not required.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Accepts an explicit `null`.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets a default value. Implies the field is optional.
    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        if value.is_null() {
            self.nullable = true;
        }
        self.default = Some(value);
        self.required = false;
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Inclusive lower bound for numeric values.
    #[must_use]
    pub fn min(mut self, bound: f64) -> Self {
        self.constraints.push(Constraint::Min(bound));
        self
    }

    /// Inclusive upper bound for numeric values.
    #[must_use]
    pub fn max(mut self, bound: f64) -> Self {
        self.constraints.push(Constraint::Max(bound));
        self
    }

    /// Minimum length of a string (in chars) or array.
    #[must_use]
    pub fn min_length(mut self, len: usize) -> Self {
        self.constraints.push(Constraint::MinLength(len));
        self
    }

    /// Maximum length of a string (in chars) or array.
    #[must_use]
    pub fn max_length(mut self, len: usize) -> Self {
        self.constraints.push(Constraint::MaxLength(len));
        self
    }

    /// String values must match `pattern`.
    #[must_use]
    pub fn pattern(mut self, pattern: Regex) -> Self {
        self.constraints.push(Constraint::Pattern(pattern));
        self
    }

    fn document(&self) -> Value {
        let mut doc = match self.kind.document() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(description) = &self.description {
            doc.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(default) = &self.default {
            doc.insert("default".into(), default.clone());
        }
        if self.nullable {
            doc.insert("nullable".into(), Value::Bool(true));
        }
        for constraint in &self.constraints {
            let (key, value) = constraint.document();
            doc.insert(key.into(), value);
        }
        Value::Object(doc)
    }
}

/// Value kind expected for a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    /// Homogeneous array of the inner kind.
    Array(Box<FieldKind>),
    /// Nested object validated against its own schema.
    Object(Arc<Schema>),
    /// Any JSON value, passed through untouched.
    Any,
}

impl FieldKind {
    fn document(&self) -> Value {
        match self {
            Self::String => json!({"type": "string"}),
            Self::Integer => json!({"type": "integer"}),
            Self::Number => json!({"type": "number"}),
            Self::Boolean => json!({"type": "boolean"}),
            Self::Array(items) => json!({"type": "array", "items": items.document()}),
            Self::Object(schema) => schema.document(),
            Self::Any => json!({}),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::Number => f.write_str("number"),
            Self::Boolean => f.write_str("boolean"),
            Self::Array(items) => write!(f, "array of {items}"),
            Self::Object(schema) => write!(f, "object ({})", schema.name),
            Self::Any => f.write_str("any"),
        }
    }
}

/// Declared constraint on a field value.
#[derive(Debug, Clone)]
pub enum Constraint {
    Min(f64),
    Max(f64),
    MinLength(usize),
    MaxLength(usize),
    Pattern(Regex),
}

impl Constraint {
    fn document(&self) -> (&'static str, Value) {
        match self {
            Self::Min(v) => ("minimum", json!(v)),
            Self::Max(v) => ("maximum", json!(v)),
            Self::MinLength(v) => ("minLength", json!(v)),
            Self::MaxLength(v) => ("maxLength", json!(v)),
            Self::Pattern(re) => ("pattern", Value::String(re.as_str().to_string())),
        }
    }
}
