//! Host and group configuration.
//!
//! Group and service configs are read from JSON or YAML files. A document
//! with a `groups` mapping is a [`ServiceConfig`]; anything else is a single
//! [`GroupConfig`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use opdispatch_core::ContextFactory;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::descriptor::{validate_name, ServiceGroup};
use super::group::GroupRuntime;
use super::operation::ConfigurationError;
use super::registry::ManagedGroup;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Host-level configuration for the dispatch framework.
///
/// Controls batch deadlines, concurrency limits, and group lock waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported by the host.
    pub name: String,
    /// Shared deadline for every batch, in milliseconds.
    pub operation_timeout_ms: u64,
    /// Maximum number of concurrent dispatches before load shedding.
    pub max_concurrent_operations: u32,
    /// How long a call may wait for its group lock. Unbounded when `None`.
    pub lock_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "opdispatch".to_string(),
            operation_timeout_ms: 30_000,
            max_concurrent_operations: 1000,
            lock_timeout_ms: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Group and service configs
// ---------------------------------------------------------------------------

/// Configuration of one service group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    /// Arbitrary group settings. The `operations` key, when present, maps
    /// member names to metadata overrides.
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    /// Locator of the group implementation (`module:Group`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_path: Option<String>,
}

impl GroupConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Per-operation metadata overrides from `config.operations`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidOverride`] if `operations` is not a mapping.
    pub fn operation_overrides(&self) -> Result<Option<&Map<String, Value>>, ConfigurationError> {
        match self.config.get("operations") {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map)),
            Some(_) => Err(ConfigurationError::InvalidOverride {
                operation: self.name.clone(),
                field: "operations",
                expected: "an object",
            }),
        }
    }
}

/// Configuration of a multi-group service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Group locator -> group config.
    pub groups: BTreeMap<String, GroupConfig>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

/// A loaded configuration document.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedConfig {
    Service(ServiceConfig),
    Group(GroupConfig),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported config format '{}': expected .json, .yaml or .yml", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("failed to parse config '{}': {message}", .path.display())]
    Format { path: PathBuf, message: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Reads and validates a group or service config.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file is missing, has an unsupported
/// extension, fails to parse, or describes invalid group names.
pub fn load_config(path: impl AsRef<Path>) -> Result<LoadedConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let format_error = |message: String| ConfigError::Format {
        path: path.to_path_buf(),
        message,
    };

    let document: Value = match extension.as_deref() {
        Some("json") => serde_json::from_str(&content).map_err(|e| format_error(e.to_string()))?,
        Some("yaml" | "yml") => serde_yaml::from_str(&content).map_err(|e| format_error(e.to_string()))?,
        _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
    };

    let loaded = if document.get("groups").is_some_and(Value::is_object) {
        LoadedConfig::Service(serde_json::from_value(document).map_err(|e| format_error(e.to_string()))?)
    } else {
        LoadedConfig::Group(serde_json::from_value(document).map_err(|e| format_error(e.to_string()))?)
    };
    loaded.validate()?;
    Ok(loaded)
}

impl LoadedConfig {
    /// Checks group names: non-empty, free of `.`, and unique.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first offending name.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let groups: Vec<&GroupConfig> = match self {
            Self::Service(service) => service.groups.values().collect(),
            Self::Group(group) => vec![group],
        };
        let mut seen = HashSet::new();
        for group in groups {
            validate_name(&group.name)
                .map_err(|_| ConfigError::Invalid(format!("invalid group name '{}'", group.name)))?;
            if !seen.insert(group.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate group name '{}'", group.name)));
            }
            if let Some(Value::Object(_)) | None = group.config.get("operations") {
                continue;
            }
            return Err(ConfigError::Invalid(format!(
                "group '{}': config.operations must be a mapping",
                group.name
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GroupCatalog
// ---------------------------------------------------------------------------

/// Runtime settings applied to every group a catalog builds.
#[derive(Debug, Clone)]
pub struct GroupOptions {
    pub contexts: Arc<dyn ContextFactory>,
    pub lock_timeout: Option<Duration>,
}

type GroupConstructor =
    Arc<dyn Fn(&GroupConfig, &GroupOptions) -> Result<Arc<dyn ManagedGroup>, ConfigurationError> + Send + Sync>;

/// Maps config locators to group constructors.
#[derive(Clone, Default)]
pub struct GroupCatalog {
    constructors: HashMap<String, GroupConstructor>,
}

impl GroupCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `build` under `locator`. The group is named after its config.
    #[must_use]
    pub fn with<G, F>(mut self, locator: impl Into<String>, build: F) -> Self
    where
        G: ServiceGroup,
        F: Fn(&GroupConfig) -> G + Send + Sync + 'static,
    {
        let constructor: GroupConstructor = Arc::new(move |config, options| {
            let runtime = GroupRuntime::with_overrides(&config.name, build(config), config.operation_overrides()?)?
                .with_context_factory(Arc::clone(&options.contexts))
                .with_lock_timeout(options.lock_timeout);
            Ok(Arc::new(runtime) as Arc<dyn ManagedGroup>)
        });
        self.constructors.insert(locator.into(), constructor);
        self
    }

    #[must_use]
    pub fn contains(&self, locator: &str) -> bool {
        self.constructors.contains_key(locator)
    }

    /// Locators in sorted order.
    #[must_use]
    pub fn locators(&self) -> Vec<&str> {
        let mut locators: Vec<_> = self.constructors.keys().map(String::as_str).collect();
        locators.sort_unstable();
        locators
    }

    /// Builds the group registered under `locator`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnknownLocator`] for an unregistered
    /// locator, or whatever registration error the group raises.
    pub fn build(
        &self,
        locator: &str,
        config: &GroupConfig,
        options: &GroupOptions,
    ) -> Result<Arc<dyn ManagedGroup>, ConfigurationError> {
        let constructor = self
            .constructors
            .get(locator)
            .ok_or_else(|| ConfigurationError::UnknownLocator {
                locator: locator.to_string(),
            })?;
        constructor(config, options)
    }
}

impl std::fmt::Debug for GroupCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupCatalog")
            .field("locators", &self.locators())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
