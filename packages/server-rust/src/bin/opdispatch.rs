//! opdispatch CLI: list and invoke operations of configured groups.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use opdispatch_core::{Arguments, QualifiedCall};
use opdispatch_server::service::domain::{demo_catalog, register_demo_groups};
use opdispatch_server::service::{load_config, LoadedConfig, ServerConfig, ServiceHost, VerificationResult, Verifier};
use opdispatch_server::telemetry::{init_tracing, LogFormat};
use serde::Deserialize;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "opdispatch")]
#[command(author, version, about = "Operation registry and dispatch engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Group or service config (.json, .yaml, .yml). Demo groups are served without one.
    #[arg(long, env = "OPDISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Deadline for every call or batch, in milliseconds
    #[arg(long, env = "OPDISPATCH_TIMEOUT_MS", default_value = "30000")]
    timeout_ms: u64,

    /// Maximum concurrent dispatches before load shedding
    #[arg(long, default_value = "1000")]
    max_concurrent: u32,

    /// How long a call may wait for its group lock, in milliseconds
    #[arg(long)]
    lock_timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// List every registered operation as JSON
    List,

    /// Invoke one operation
    Call {
        /// Qualified operation name (group.operation)
        name: String,

        /// Arguments (JSON object)
        #[arg(long)]
        args: Option<String>,
    },

    /// Invoke several operations concurrently
    Batch {
        /// JSON array of {"operation": "group.operation", "arguments": {...}}
        calls: String,
    },

    /// Run the built-in checks against the demo groups
    Verify {
        /// Deadline used by the timeout checks, in milliseconds
        #[arg(long, default_value = "1000")]
        check_timeout_ms: u64,
    },
}

#[derive(Deserialize)]
struct BatchItem {
    operation: String,
    #[serde(default)]
    arguments: Option<Arguments>,
}

fn parse_arguments(raw: Option<&str>) -> anyhow::Result<Option<Arguments>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match serde_json::from_str::<Value>(raw).context("--args is not valid JSON")? {
        Value::Object(map) => Ok(Some(map)),
        Value::Null => Ok(None),
        other => anyhow::bail!("--args must be a JSON object, got {other}"),
    }
}

fn build_host(cli: &Cli) -> anyhow::Result<ServiceHost> {
    let mut server = ServerConfig {
        operation_timeout_ms: cli.timeout_ms,
        max_concurrent_operations: cli.max_concurrent,
        lock_timeout_ms: cli.lock_timeout_ms,
        ..ServerConfig::default()
    };

    let Some(path) = &cli.config else {
        let host = ServiceHost::new(server);
        register_demo_groups(&host)?;
        return Ok(host);
    };

    let loaded = load_config(path)?;
    let catalog = demo_catalog();
    match loaded {
        LoadedConfig::Service(service) => {
            server.name.clone_from(&service.name);
            let host = ServiceHost::new(server);
            host.register_service(&service, &catalog)?;
            Ok(host)
        }
        LoadedConfig::Group(group) => {
            server.name.clone_from(&group.name);
            let host = ServiceHost::new(server);
            host.register_group_config(&group, &catalog)?;
            Ok(host)
        }
    }
}

/// Runs one host-backed command. Returns whether the outcome was a failure.
async fn run(host: &ServiceHost, command: &Commands) -> anyhow::Result<bool> {
    let failed = match command {
        Commands::List => {
            println!("{}", serde_json::to_string_pretty(&host.list_operations())?);
            false
        }
        Commands::Call { name, args } => {
            let arguments = parse_arguments(args.as_deref())?;
            let response = host.route_and_execute(name, arguments).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            response.is_error()
        }
        Commands::Batch { calls } => {
            let items: Vec<BatchItem> = serde_json::from_str(calls).context("batch calls are not valid JSON")?;
            let calls = items
                .into_iter()
                .map(|item| QualifiedCall::new(item.operation, item.arguments))
                .collect();
            let response = host.execute_batch(calls).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            response.has_errors()
        }
        Commands::Verify { check_timeout_ms } => {
            let results = Verifier::new(Duration::from_millis(*check_timeout_ms)).run_all().await;
            println!("{}", serde_json::to_string_pretty(&results)?);
            !results.iter().all(VerificationResult::passed)
        }
    };
    Ok(failed)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let host = build_host(&cli)?;
    tracing::info!(name = %host.config().name, groups = host.groups().len(), "host ready");

    let outcome = run(&host, &cli.command).await;
    host.shutdown().await;
    Ok(if outcome? { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}
