//! opdispatch server: operation groups, qualified-name routing and batch execution.

pub mod service;
pub mod telemetry;

pub use service::{ServerConfig, ServiceHost};

