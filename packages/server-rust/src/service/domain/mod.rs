//! Built-in demo groups.
//!
//! Served by the `opdispatch` binary when no config file is given, and
//! addressable from configs through [`demo_catalog`].

pub mod example;
pub mod schema;
pub mod timeout;

pub use example::{EchoSchema, ExampleGroup};
pub use schema::{ListProcessingSchema, MessageSchema, PersonSchema, SchemaGroup};
pub use timeout::TimeoutGroup;

use super::config::{GroupCatalog, GroupConfig};
use super::host::ServiceHost;
use super::operation::ConfigurationError;

pub const EXAMPLE_LOCATOR: &str = "opdispatch.domain.example:ExampleGroup";
pub const SCHEMA_LOCATOR: &str = "opdispatch.domain.schema:SchemaGroup";
pub const TIMEOUT_LOCATOR: &str = "opdispatch.domain.timeout:TimeoutGroup";

/// Catalog of the demo groups, keyed by locator.
#[must_use]
pub fn demo_catalog() -> GroupCatalog {
    GroupCatalog::new()
        .with(EXAMPLE_LOCATOR, |_: &GroupConfig| ExampleGroup)
        .with(SCHEMA_LOCATOR, |_: &GroupConfig| SchemaGroup)
        .with(TIMEOUT_LOCATOR, |_: &GroupConfig| TimeoutGroup)
}

/// Registers the demo groups as `example`, `schema` and `timeout`.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if any of the names is already taken.
pub fn register_demo_groups(host: &ServiceHost) -> Result<(), ConfigurationError> {
    host.register("example", ExampleGroup)?;
    host.register("schema", SchemaGroup)?;
    host.register("timeout", TimeoutGroup)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::config::ServerConfig;

    #[test]
    fn demo_groups_register() {
        let host = ServiceHost::new(ServerConfig::default());
        register_demo_groups(&host).unwrap();

        let names: Vec<_> = host.list_operations().into_iter().map(|op| op.name).collect();
        assert!(names.contains(&"example.echo".to_string()));
        assert!(names.contains(&"schema.process_list".to_string()));
        assert!(names.contains(&"timeout.slow_counter".to_string()));
    }

    #[test]
    fn catalog_knows_every_demo_group() {
        let catalog = demo_catalog();
        assert_eq!(
            catalog.locators(),
            vec![EXAMPLE_LOCATOR, SCHEMA_LOCATOR, TIMEOUT_LOCATOR]
        );
    }
}
