//! Self-checks run against freshly built hosts serving the demo groups.
//!
//! Each check family builds its own [`ServiceHost`], so a failure in one
//! cannot leave locks or in-flight calls behind for the next.

use std::time::Duration;

use opdispatch_core::{Arguments, ErrorKind, ExecutionResponse, QualifiedCall};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use super::config::ServerConfig;
use super::domain::{demo_catalog, register_demo_groups, EXAMPLE_LOCATOR, SCHEMA_LOCATOR, TIMEOUT_LOCATOR};
use super::host::ServiceHost;

/// One named pass/fail observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

/// The checks of one family, e.g. "Timeout Handling".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub name: String,
    pub checks: Vec<Check>,
}

impl VerificationResult {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checks: Vec::new(),
        }
    }

    fn record(&mut self, name: impl Into<String>, passed: bool, detail: impl Into<String>) {
        let check = Check {
            name: name.into(),
            passed,
            detail: detail.into(),
        };
        if check.passed {
            debug!(family = %self.name, check = %check.name, "check passed");
        } else {
            error!(family = %self.name, check = %check.name, detail = %check.detail, "check failed");
        }
        self.checks.push(check);
    }

    #[must_use]
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    #[must_use]
    pub fn failures(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }
}

/// A call to make and the text its content must contain.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub operation: String,
    pub arguments: Option<Arguments>,
    pub expected: Option<String>,
}

impl Scenario {
    pub fn new(operation: impl Into<String>, arguments: Value) -> Self {
        Self {
            operation: operation.into(),
            arguments: object(arguments),
            expected: None,
        }
    }

    #[must_use]
    pub fn expect(mut self, text: impl Into<String>) -> Self {
        self.expected = Some(text.into());
        self
    }
}

/// Runs the demo-group check families.
#[derive(Debug, Clone)]
pub struct Verifier {
    timeout: Duration,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl Verifier {
    /// `timeout` is the deadline given to the host in the timeout family.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn demo_host(config: ServerConfig) -> Result<ServiceHost, String> {
        let host = ServiceHost::new(config);
        register_demo_groups(&host).map_err(|e| e.to_string())?;
        Ok(host)
    }

    /// Runtime and catalog sanity: the demo locators resolve and register.
    #[must_use]
    pub fn check_environment(&self) -> VerificationResult {
        let mut result = VerificationResult::new("Environment");
        result.record("Version", true, format!("opdispatch {}", env!("CARGO_PKG_VERSION")));
        result.record(
            "Async runtime",
            tokio::runtime::Handle::try_current().is_ok(),
            "a tokio runtime is required to dispatch",
        );

        let catalog = demo_catalog();
        for locator in [EXAMPLE_LOCATOR, SCHEMA_LOCATOR, TIMEOUT_LOCATOR] {
            result.record(format!("Locator: {locator}"), catalog.contains(locator), "");
        }
        match Self::demo_host(ServerConfig::default()) {
            Ok(host) => result.record("Demo groups", true, format!("{} groups", host.groups().len())),
            Err(e) => result.record("Demo groups", false, e),
        }
        result
    }

    /// Confirms every scenario's operation is listed, then runs each one.
    pub async fn check_group(&self, host: &ServiceHost, group: &str, scenarios: &[Scenario]) -> VerificationResult {
        let mut result = VerificationResult::new(format!("{group} Group"));

        let listed: Vec<String> = host.list_operations().into_iter().map(|op| op.name).collect();
        let missing: Vec<&str> = scenarios
            .iter()
            .map(|s| s.operation.as_str())
            .filter(|name| !listed.iter().any(|l| l == name))
            .collect();
        if missing.is_empty() {
            result.record("Available operations", true, "");
        } else {
            result.record("Available operations", false, format!("missing: {}", missing.join(", ")));
        }

        for scenario in scenarios {
            let response = host.route_and_execute(&scenario.operation, scenario.arguments.clone()).await;
            let (passed, detail) = judge(&response, scenario.expected.as_deref());
            result.record(&scenario.operation, passed, detail);
        }
        result
    }

    /// Flat and nested schema input, extra nested keys, and a rejected value.
    pub async fn check_schema_validation(&self) -> VerificationResult {
        let mut result = VerificationResult::new("Schema Validation");
        let host = match Self::demo_host(ServerConfig::default()) {
            Ok(host) => host,
            Err(e) => {
                result.record("Host setup", false, e);
                return result;
            }
        };

        let has_schema = host
            .list_operations()
            .iter()
            .any(|op| op.name == "schema.greet_person" && op.schema.is_some());
        result.record("Schema definition", has_schema, "schema.greet_person publishes a schema");

        let greeting = "Hello, Jane! You are 25 years old.";
        let inputs = [
            ("Flat input", json!({"name": "Jane", "age": 25})),
            ("Nested input", json!({"person": {"name": "Jane", "age": 25}})),
            ("Nested input with extra keys", json!({"person": {"name": "Jane", "age": 25, "nickname": "J"}})),
        ];
        for (name, args) in inputs {
            let scenario = Scenario::new("schema.greet_person", args).expect(greeting);
            let response = host.route_and_execute(&scenario.operation, scenario.arguments).await;
            let (passed, detail) = judge(&response, scenario.expected.as_deref());
            result.record(name, passed, detail);
        }

        let rejected = host
            .route_and_execute("schema.greet_person", object(json!({"name": "Jane", "age": "old"})))
            .await;
        result.record(
            "Invalid input rejected",
            rejected.error_kind == Some(ErrorKind::Validation),
            rejected.error.unwrap_or_default(),
        );
        result
    }

    /// A short sleep completes under the deadline; a long one times out.
    pub async fn check_timeout_handling(&self) -> VerificationResult {
        let mut result = VerificationResult::new("Timeout Handling");
        let config = ServerConfig {
            operation_timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            ..ServerConfig::default()
        };
        let host = match Self::demo_host(config) {
            Ok(host) => host,
            Err(e) => {
                result.record("Host setup", false, e);
                return result;
            }
        };

        let short = self.timeout.as_secs_f64() / 5.0;
        let response = host.route_and_execute("timeout.sleep", object(json!({"seconds": short}))).await;
        let (passed, detail) = judge(&response, Some("Slept for"));
        result.record("Completes before deadline", passed, detail);

        let long = self.timeout.as_secs_f64() * 2.0;
        let response = host.route_and_execute("timeout.sleep", object(json!({"seconds": long}))).await;
        result.record(
            "Exceeds deadline",
            response.error_kind == Some(ErrorKind::Timeout),
            response.error.unwrap_or_default(),
        );
        result
    }

    /// One batch spanning every demo group, plus an unknown group.
    pub async fn check_multi_group(&self) -> VerificationResult {
        let mut result = VerificationResult::new("Multi-Group");
        let host = match Self::demo_host(ServerConfig::default()) {
            Ok(host) => host,
            Err(e) => {
                result.record("Host setup", false, e);
                return result;
            }
        };

        let calls = vec![
            QualifiedCall::new("example.hello_world", None),
            QualifiedCall::new("schema.repeat_message", object(json!({"text": "hi", "repeat": 2}))),
            QualifiedCall::new("timeout.sleep", object(json!({"seconds": 0.01}))),
            QualifiedCall::new("missing.op", None),
        ];
        let response = host.execute_batch(calls).await;
        let text = response.content.to_text();
        let lines: Vec<&str> = text.lines().collect();

        result.record(
            "Results in submission order",
            lines.len() == 3 && lines[0] == "Hello, World!" && lines[1] == "hi hi" && lines[2].starts_with("Slept for"),
            text.clone(),
        );
        result.record(
            "Unknown group isolated",
            response.errors == ["Group not found: missing"],
            response.errors.join("; "),
        );
        result
    }

    /// Every family, in a fixed order.
    pub async fn run_all(&self) -> Vec<VerificationResult> {
        let mut results = vec![self.check_environment()];

        match Self::demo_host(ServerConfig::default()) {
            Ok(host) => {
                let example = [
                    Scenario::new("example.hello_world", Value::Null).expect("Hello, World!"),
                    Scenario::new("example.echo", json!({"text": "verify"})).expect("Echo: verify"),
                    Scenario::new("example.count_to", json!({"number": 3})).expect("1, 2, 3"),
                ];
                results.push(self.check_group(&host, "example", &example).await);
                host.shutdown().await;
            }
            Err(e) => {
                let mut failed = VerificationResult::new("example Group");
                failed.record("Host setup", false, e);
                results.push(failed);
            }
        }

        results.push(self.check_schema_validation().await);
        results.push(self.check_timeout_handling().await);
        results.push(self.check_multi_group().await);

        let failures: usize = results.iter().map(VerificationResult::failures).sum();
        info!(families = results.len(), failures, "verification complete");
        results
    }
}

fn object(value: Value) -> Option<Arguments> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn judge(response: &ExecutionResponse, expected: Option<&str>) -> (bool, String) {
    let text = response.content.to_text();
    if let Some(error) = &response.error {
        return (false, error.clone());
    }
    match expected {
        Some(needle) if !text.contains(needle) => (false, format!("expected '{needle}' in '{text}'")),
        _ => (true, text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn environment_sees_demo_catalog() {
        let result = Verifier::default().check_environment();
        assert!(result.passed(), "{result:?}");
        assert!(result.checks.iter().any(|c| c.name == format!("Locator: {TIMEOUT_LOCATOR}")));
    }

    #[tokio::test]
    async fn group_check_reports_missing_and_mismatched() {
        let host = Verifier::demo_host(ServerConfig::default()).unwrap();
        let scenarios = [
            Scenario::new("example.echo", json!({"text": "a"})).expect("Echo: b"),
            Scenario::new("example.gone", Value::Null),
        ];
        let result = Verifier::default().check_group(&host, "example", &scenarios).await;

        assert_eq!(result.failures(), 3);
        assert_eq!(result.checks[0].detail, "missing: example.gone");
        assert_eq!(result.checks[1].detail, "expected 'Echo: b' in 'Echo: a'");
        assert_eq!(result.checks[2].detail, "Unknown operation: gone");
    }

    #[tokio::test]
    async fn schema_family_passes() {
        let result = Verifier::default().check_schema_validation().await;
        assert!(result.passed(), "{result:?}");
        assert_eq!(result.checks.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_family_passes_under_short_deadline() {
        let result = Verifier::new(Duration::from_millis(200)).check_timeout_handling().await;
        assert!(result.passed(), "{result:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn all_families_pass() {
        let results = Verifier::default().run_all().await;
        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            ["Environment", "example Group", "Schema Validation", "Timeout Handling", "Multi-Group"]
        );
        assert!(results.iter().all(VerificationResult::passed), "{results:?}");
    }
}
