//! Explicit operation registration.
//!
//! A [`ServiceGroup`] lists its operations through a [`Registrar`]; each entry
//! is an [`OperationSpec`] describing the handler, its declared parameters and
//! its metadata. [`ServiceGroupRegistry::build`] resolves overrides, detects
//! context requirements, checks schema bindings and produces the immutable
//! name -> descriptor map the dispatcher reads from.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use opdispatch_core::{InputSchema, Nested, OutputKind, ParameterTransformer, Schema, SchemaBound};
use serde_json::{Map, Value};
use tracing::debug;

use super::operation::{Call, ConfigurationError, Handler, OperationInfo, OperationResult, ParamDecl};

/// Reserved parameter name that marks a context slot.
pub const CONTEXT_PARAM: &str = "ctx";
/// Type-name suffix that marks a context slot.
pub const CONTEXT_SUFFIX: &str = "Context";

// ---------------------------------------------------------------------------
// ServiceGroup
// ---------------------------------------------------------------------------

/// A named collection of operations sharing one instance and one lock.
pub trait ServiceGroup: Sized + Send + 'static {
    /// Declares every operation this group exposes.
    fn register(registrar: &mut Registrar<Self>);
}

/// Collects the operation specs a group declares.
pub struct Registrar<G> {
    specs: Vec<OperationSpec<G>>,
}

impl<G: ServiceGroup> Registrar<G> {
    fn new() -> Self {
        Self { specs: Vec::new() }
    }

    /// Adds an operation.
    pub fn operation(&mut self, spec: OperationSpec<G>) -> &mut Self {
        self.specs.push(spec);
        self
    }
}

// ---------------------------------------------------------------------------
// OperationSpec
// ---------------------------------------------------------------------------

/// Builder for one operation declaration.
pub struct OperationSpec<G> {
    member: String,
    handler: Handler<G>,
    doc: Option<String>,
    params: Vec<ParamDecl>,
    schema: Option<Arc<Schema>>,
    output: OutputKind,
    transformer: Option<Arc<dyn ParameterTransformer>>,
    allow_extra: bool,
    metadata: Map<String, Value>,
}

impl<G: ServiceGroup> OperationSpec<G> {
    /// Declares operation `member` with its async body.
    pub fn new<F>(member: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut G, Call) -> BoxFuture<'a, OperationResult> + Send + Sync + 'static,
    {
        Self {
            member: member.into(),
            handler: Arc::new(handler),
            doc: None,
            params: Vec::new(),
            schema: None,
            output: OutputKind::Text,
            transformer: None,
            allow_extra: false,
            metadata: Map::new(),
        }
    }

    /// Declares a required parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push(ParamDecl {
            name: name.into(),
            type_name: type_name.into(),
            required: true,
        });
        self
    }

    /// Declares a parameter that may be omitted.
    #[must_use]
    pub fn optional_param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push(ParamDecl {
            name: name.into(),
            type_name: type_name.into(),
            required: false,
        });
        self
    }

    /// Documentation text, used as the description unless one is set.
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    /// Overrides the effective operation name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.metadata.insert("name".into(), Value::String(name.into()));
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata
            .insert("description".into(), Value::String(description.into()));
        self
    }

    /// Policy tags attached to the operation.
    #[must_use]
    pub fn policy<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = tags.into_iter().map(|t| Value::String(t.into())).collect();
        self.metadata.insert("policy".into(), Value::Array(tags));
        self
    }

    /// Explicitly marks whether the operation takes a context, overriding detection.
    #[must_use]
    pub fn requires_context(mut self, requires: bool) -> Self {
        self.metadata
            .insert("requires_context".into(), Value::Bool(requires));
        self
    }

    /// Raw metadata overrides, validated when the registry is built.
    #[must_use]
    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Binds the input schema of `T`.
    #[must_use]
    pub fn schema<T: InputSchema>(self) -> Self {
        self.schema_def(T::schema())
    }

    #[must_use]
    pub fn schema_def(mut self, schema: Schema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    #[must_use]
    pub fn output(mut self, output: OutputKind) -> Self {
        self.output = output;
        self
    }

    /// Replaces the default [`Nested`] argument shaping.
    #[must_use]
    pub fn transformer(mut self, transformer: impl ParameterTransformer + 'static) -> Self {
        self.transformer = Some(Arc::new(transformer));
        self
    }

    /// Accepts argument keys that match no declared parameter.
    #[must_use]
    pub fn accept_extra_args(mut self) -> Self {
        self.allow_extra = true;
        self
    }

    fn resolve(
        self,
        group: &str,
        overrides: Option<&Map<String, Value>>,
    ) -> Result<Descriptor<G>, ConfigurationError> {
        let mut metadata = self.metadata;
        if let Some(overrides) = overrides {
            metadata.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let invalid = |field: &'static str, expected: &'static str| ConfigurationError::InvalidOverride {
            operation: self.member.clone(),
            field,
            expected,
        };

        let name = match metadata.get("name") {
            None => self.member.clone(),
            Some(Value::String(name)) => name.clone(),
            Some(_) => return Err(invalid("name", "a string")),
        };
        validate_name(&name)?;

        let description = match metadata.get("description") {
            Some(Value::String(description)) => description.clone(),
            Some(_) => return Err(invalid("description", "a string")),
            None => self
                .doc
                .clone()
                .unwrap_or_else(|| format!("Operation {name} in group {group}")),
        };

        let policy = match metadata.get("policy") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(tag)) => vec![tag.clone()],
            Some(Value::Array(tags)) => tags
                .iter()
                .map(|t| t.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| invalid("policy", "a string or a list of strings"))?,
            Some(_) => return Err(invalid("policy", "a string or a list of strings")),
        };

        let explicit_context = match metadata.get("requires_context") {
            None => None,
            Some(Value::Bool(flag)) => Some(*flag),
            Some(_) => return Err(invalid("requires_context", "a boolean")),
        };
        let context_position = self
            .params
            .iter()
            .position(|p| p.name == CONTEXT_PARAM || p.type_name.ends_with(CONTEXT_SUFFIX));
        let requires_context = explicit_context.unwrap_or(context_position.is_some());

        let schema_param = match &self.schema {
            None => None,
            Some(schema) => {
                let matches: Vec<_> = self
                    .params
                    .iter()
                    .filter(|p| p.type_name == schema.name)
                    .collect();
                match matches.as_slice() {
                    [param] => Some(param.name.clone()),
                    _ => {
                        return Err(ConfigurationError::SchemaParameterMismatch {
                            operation: name,
                            schema: schema.name.clone(),
                            found: matches.len(),
                        })
                    }
                }
            }
        };

        let binder = match (&self.schema, &schema_param) {
            (Some(schema), Some(param)) => Some(SchemaBound::new(Arc::clone(schema), param.clone())),
            _ => None,
        };

        debug!(
            group,
            operation = %name,
            requires_context,
            schema = self.schema.as_ref().map(|s| s.name.as_str()),
            "operation registered"
        );

        Ok(Descriptor {
            info: Arc::new(OperationInfo {
                name,
                member: self.member,
                description,
                params: self.params,
                schema: self.schema,
                schema_param,
                requires_context,
                context_position,
                policy,
                output: self.output,
                allow_extra: self.allow_extra,
            }),
            handler: self.handler,
            transformer: self.transformer.unwrap_or_else(|| Arc::new(Nested)),
            binder,
        })
    }
}

/// Names must be non-empty and free of the `.` separator.
///
/// # Errors
///
/// Returns [`ConfigurationError::InvalidName`] otherwise.
pub fn validate_name(name: &str) -> Result<(), ConfigurationError> {
    if name.is_empty() || name.contains('.') {
        return Err(ConfigurationError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Descriptor and registry
// ---------------------------------------------------------------------------

/// Registry entry: metadata plus the callable bits the dispatcher needs.
pub struct Descriptor<G> {
    pub info: Arc<OperationInfo>,
    pub(crate) handler: Handler<G>,
    pub(crate) transformer: Arc<dyn ParameterTransformer>,
    /// Schema-binding step, present when a schema is declared.
    pub(crate) binder: Option<SchemaBound>,
}

/// Immutable name -> descriptor map for one group.
pub struct ServiceGroupRegistry<G> {
    group: String,
    operations: HashMap<String, Descriptor<G>>,
}

impl<G: ServiceGroup> ServiceGroupRegistry<G> {
    /// Builds the registry for `G`.
    ///
    /// `overrides` is the `operations` mapping of the group config: member
    /// name -> metadata overrides taking precedence over the declaration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if any declaration is invalid or two
    /// operations resolve to the same name. No partial registry is produced.
    pub fn build(group: &str, overrides: Option<&Map<String, Value>>) -> Result<Self, ConfigurationError> {
        let mut registrar = Registrar::new();
        G::register(&mut registrar);

        let mut operations = HashMap::with_capacity(registrar.specs.len());
        for spec in registrar.specs {
            let member_overrides = match overrides.and_then(|o| o.get(&spec.member)) {
                None => None,
                Some(Value::Object(map)) => Some(map),
                Some(_) => {
                    return Err(ConfigurationError::InvalidOverride {
                        operation: spec.member,
                        field: "operations",
                        expected: "an object",
                    })
                }
            };
            let descriptor = spec.resolve(group, member_overrides)?;
            let name = descriptor.info.name.clone();
            if operations.contains_key(&name) {
                return Err(ConfigurationError::DuplicateOperation {
                    group: group.to_string(),
                    name,
                });
            }
            operations.insert(name, descriptor);
        }

        Ok(Self {
            group: group.to_string(),
            operations,
        })
    }

    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Descriptor<G>> {
        self.operations.get(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Operation metadata sorted by name.
    #[must_use]
    pub fn infos(&self) -> Vec<Arc<OperationInfo>> {
        let mut infos: Vec<_> = self.operations.values().map(|d| Arc::clone(&d.info)).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
