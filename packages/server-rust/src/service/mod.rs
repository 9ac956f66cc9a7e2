//! Operation registration, routing and execution.
//!
//! 1. **Registration** (`descriptor`): groups declare operations through a [`Registrar`]
//! 2. **Dispatch** (`group`): per-group lock, context injection, argument shaping
//! 3. **Middleware** (`middleware`): Tower layers (load shedding, metrics)
//! 4. **Routing** (`router`, `host`): qualified `group.operation` names to groups
//! 5. **Batches** (`batch`): concurrent fan-out under one deadline
//! 6. **Demo groups** (`domain`)
//! 7. **Self-checks** (`verify`): scenario runs against the demo groups

pub mod batch;
pub mod config;
pub mod descriptor;
pub mod domain;
pub mod group;
pub mod host;
pub mod inflight;
pub mod inject;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;
pub mod verify;

// Re-export key types for convenient access.
pub use batch::{BatchEntry, BatchExecutor};
pub use config::{load_config, ConfigError, GroupCatalog, GroupConfig, LoadedConfig, ServerConfig, ServiceConfig};
pub use descriptor::{OperationSpec, Registrar, ServiceGroup, ServiceGroupRegistry};
pub use group::GroupRuntime;
pub use host::{OperationListing, ServiceHost};
pub use operation::{
    BatchTimeout, Call, Cancelled, ConfigurationError, OperationError, OperationInfo, OperationResult,
};
pub use registry::{GroupRegistry, ManagedGroup};
pub use router::{OperationRouter, RoutedCall};
pub use verify::{Check, Scenario, VerificationResult, Verifier};
