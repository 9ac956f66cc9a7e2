//! End-to-end dispatch through `ServiceHost` with the demo groups.

use std::sync::Arc;
use std::time::Duration;

use opdispatch_core::{
    Arguments, CallContext, Content, ErrorKind, ExecutionRequest, QualifiedCall, RecordingContext,
    RecordingContextFactory, ServiceRequest, SuppliedContext,
};
use opdispatch_server::service::domain::register_demo_groups;
use opdispatch_server::service::{
    Call, OperationError, OperationResult, OperationSpec, Registrar, ServerConfig, ServiceGroup, ServiceHost,
};
use serde_json::{json, Value};

fn args(value: Value) -> Option<Arguments> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn demo_host(config: ServerConfig) -> ServiceHost {
    let host = ServiceHost::new(config);
    register_demo_groups(&host).unwrap();
    host
}

/// Group whose second operation fails in one of two ways.
struct Flaky;

impl Flaky {
    async fn ok(&mut self, call: Call) -> OperationResult {
        let n: i64 = call.arg("n")?;
        Ok(json!(format!("item {n}")))
    }

    async fn fail(&mut self, _call: Call) -> OperationResult {
        Err(OperationError::failed("item 2 broke"))
    }

    async fn crash(&mut self, _call: Call) -> OperationResult {
        panic!("item 2 crashed");
    }
}

impl ServiceGroup for Flaky {
    fn register(r: &mut Registrar<Self>) {
        r.operation(OperationSpec::new("ok", |g: &mut Self, c| Box::pin(g.ok(c))).param("n", "int"))
            .operation(OperationSpec::new("fail", |g: &mut Self, c| Box::pin(g.fail(c))))
            .operation(OperationSpec::new("crash", |g: &mut Self, c| Box::pin(g.crash(c))));
    }
}

#[tokio::test]
async fn echo_returns_prefixed_text() {
    let host = demo_host(ServerConfig::default());
    let response = host.route_and_execute("example.echo", args(json!({"text": "hi"}))).await;
    assert_eq!(response.content, Content::text("Echo: hi"));
    assert!(response.error.is_none());
}

#[tokio::test]
async fn unknown_operation_never_raises() {
    let host = demo_host(ServerConfig::default());
    let response = host.route_and_execute("example.nope", None).await;
    assert_eq!(response.error.as_deref(), Some("Unknown operation: nope"));
    assert_eq!(response.error_kind, Some(ErrorKind::NotFound));
}

#[tokio::test]
async fn failing_middle_item_keeps_neighbours() {
    let host = ServiceHost::new(ServerConfig::default());
    host.register("flaky", Flaky).unwrap();

    for broken in ["fail", "crash"] {
        let batch = ServiceRequest {
            requests: vec![
                ExecutionRequest::new("ok", args(json!({"n": 1}))),
                ExecutionRequest::new(broken, None),
                ExecutionRequest::new("ok", args(json!({"n": 3}))),
            ],
        };
        let response = host.execute_group_batch("flaky", batch).await;
        assert_eq!(response.content, Content::text("item 1\nitem 3"));
        assert_eq!(response.errors.len(), 1, "{broken}");
    }
}

#[tokio::test]
async fn failing_item_messages() {
    let host = ServiceHost::new(ServerConfig::default());
    host.register("flaky", Flaky).unwrap();

    let response = host
        .execute_batch(vec![
            QualifiedCall::new("flaky.fail", None),
            QualifiedCall::new("flaky.crash", None),
        ])
        .await;
    assert_eq!(
        response.errors,
        vec!["item 2 broke", "Operation error: item 2 crashed"]
    );
}

#[tokio::test(start_paused = true)]
async fn batch_deadline_beats_slow_operation() {
    let host = demo_host(ServerConfig {
        operation_timeout_ms: 200,
        ..ServerConfig::default()
    });
    let started = tokio::time::Instant::now();

    let batch = ServiceRequest {
        requests: vec![
            ExecutionRequest::new("hello_world", None),
            ExecutionRequest::new("hello_world", None),
        ],
    };
    assert!(!host.execute_group_batch("example", batch).await.has_errors());

    let batch = ServiceRequest {
        requests: vec![ExecutionRequest::new("sleep", args(json!({"seconds": 1.0})))],
    };
    let response = host.execute_group_batch("timeout", batch).await;

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(
        response.errors,
        vec!["Execution timeout: Operations sleep in group timeout timed out after 0.2 seconds"]
    );
    assert_eq!(
        response.content,
        Content::text("Operation timeout: Operations sleep in group timeout timed out after 0.2 seconds")
    );
}

#[tokio::test(start_paused = true)]
async fn single_call_times_out_as_a_response() {
    let host = demo_host(ServerConfig {
        operation_timeout_ms: 200,
        ..ServerConfig::default()
    });
    let response = host
        .route_and_execute("timeout.sleep", args(json!({"seconds": 1.0})))
        .await;
    assert_eq!(response.error_kind, Some(ErrorKind::Timeout));

    // The aborted call released the group lock.
    let response = host
        .route_and_execute("timeout.sleep", args(json!({"seconds": 0.05})))
        .await;
    assert_eq!(response.content, Content::text("Slept for 0.05 seconds"));
}

#[tokio::test]
async fn context_is_injected_when_omitted() {
    let factory = Arc::new(RecordingContextFactory::new());
    let host = ServiceHost::new(ServerConfig::default()).with_context_factory(factory.clone());
    register_demo_groups(&host).unwrap();

    let response = host
        .route_and_execute("schema.repeat_message", args(json!({"text": "yo", "repeat": 2})))
        .await;
    assert_eq!(response.content, Content::text("yo yo"));

    let ctx = factory.last_for("schema.repeat_message").unwrap();
    assert_eq!(ctx.messages(), vec!["Repeating message 2 times"]);
}

#[tokio::test]
async fn supplied_context_is_used_verbatim() {
    let factory = Arc::new(RecordingContextFactory::new());
    let host = ServiceHost::new(ServerConfig::default()).with_context_factory(factory.clone());
    register_demo_groups(&host).unwrap();

    let mine = Arc::new(RecordingContext::new());
    let supplied: Arc<dyn CallContext> = mine.clone();
    let call = QualifiedCall::new("schema.repeat_message", args(json!({"text": "yo"})))
        .with_context(SuppliedContext::Keyword(supplied));
    let response = host.route(call).await;

    assert_eq!(response.content, Content::text("yo"));
    assert!(factory.created().is_empty());
    assert_eq!(mine.messages(), vec!["Repeating message 1 times"]);
}

#[tokio::test]
async fn schema_bound_flat_and_nested_agree() {
    let host = demo_host(ServerConfig::default());
    let flat = host
        .route_and_execute("schema.greet_person", args(json!({"name": "Jane", "age": 25})))
        .await;
    let nested = host
        .route_and_execute(
            "schema.greet_person",
            args(json!({"person": {"name": "Jane", "age": 25}})),
        )
        .await;
    assert_eq!(flat.content, nested.content);
    assert_eq!(flat.content, Content::text("Hello, Jane! You are 25 years old. "));
}

#[tokio::test]
async fn schema_bound_nested_extra_keys_are_ignored() {
    let host = demo_host(ServerConfig::default());
    let response = host
        .route_and_execute(
            "schema.greet_person",
            args(json!({"person": {"name": "Jane", "age": 25, "nickname": "J"}})),
        )
        .await;
    assert!(response.error.is_none(), "{response:?}");
    assert_eq!(response.content, Content::text("Hello, Jane! You are 25 years old. "));
}

#[tokio::test]
async fn cross_group_batch_aggregates_in_order() {
    let host = demo_host(ServerConfig::default());
    let response = host
        .execute_batch(vec![
            QualifiedCall::new("example.count_to", args(json!({"number": 3}))),
            QualifiedCall::new("missing.op", None),
            QualifiedCall::new("example.hello_world", None),
        ])
        .await;
    assert_eq!(response.content, Content::text("1, 2, 3\nHello, World!"));
    assert_eq!(response.errors, vec!["Group not found: missing"]);
}

#[tokio::test]
async fn listing_exposes_schema_documents() {
    let host = demo_host(ServerConfig::default());
    let listing = host.list_operations();
    let greet = listing
        .iter()
        .find(|op| op.name == "schema.greet_person")
        .unwrap();
    assert!(greet.schema.is_some());
    assert!(!greet.requires_context);

    let counter = listing
        .iter()
        .find(|op| op.name == "timeout.slow_counter")
        .unwrap();
    assert!(counter.requires_context);
}
