//! Basic demo operations.

use opdispatch_core::{FieldDef, InputSchema, Schema};
use serde::Deserialize;
use serde_json::json;

use crate::service::descriptor::{OperationSpec, Registrar, ServiceGroup};
use crate::service::operation::{Call, OperationResult};

/// Input of `echo`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EchoSchema {
    pub text: String,
}

impl InputSchema for EchoSchema {
    fn schema() -> Schema {
        Schema::new("EchoSchema")
            .describe("Text to echo back")
            .field(FieldDef::string("text").describe("The text to echo back"))
    }
}

/// A basic group with simple operations.
#[derive(Debug, Default)]
pub struct ExampleGroup;

impl ExampleGroup {
    async fn hello_world(&mut self, _call: Call) -> OperationResult {
        Ok(json!("Hello, World!"))
    }

    async fn echo(&mut self, call: Call) -> OperationResult {
        let input: EchoSchema = call.input()?;
        Ok(json!(format!("Echo: {}", input.text)))
    }

    async fn count_to(&mut self, call: Call) -> OperationResult {
        let number: i64 = call.arg("number")?;
        let numbers: Vec<String> = (1..=number).map(|i| i.to_string()).collect();
        Ok(json!(numbers.join(", ")))
    }
}

impl ServiceGroup for ExampleGroup {
    fn register(r: &mut Registrar<Self>) {
        r.operation(
            OperationSpec::new("hello_world", |g: &mut Self, c| Box::pin(g.hello_world(c)))
                .doc("Return a simple hello world message."),
        )
        .operation(
            OperationSpec::new("echo", |g: &mut Self, c| Box::pin(g.echo(c)))
                .param("input", "EchoSchema")
                .schema::<EchoSchema>()
                .doc("Echo the provided text back with a prefix."),
        )
        .operation(
            OperationSpec::new("count_to", |g: &mut Self, c| Box::pin(g.count_to(c)))
                .param("number", "int")
                .doc("Return the numbers from 1 to `number`, comma separated."),
        );
    }
}

#[cfg(test)]
mod tests {
    use opdispatch_core::{Content, ErrorKind, ExecutionRequest};
    use serde_json::Value;

    use super::*;
    use crate::service::group::GroupRuntime;

    fn request(operation: &str, args: Value) -> ExecutionRequest {
        let Value::Object(args) = args else {
            panic!("expected object");
        };
        ExecutionRequest::new(operation, Some(args))
    }

    fn runtime() -> GroupRuntime<ExampleGroup> {
        GroupRuntime::new("example", ExampleGroup).unwrap()
    }

    #[tokio::test]
    async fn hello_world() {
        let response = runtime().execute(ExecutionRequest::new("hello_world", None)).await;
        assert_eq!(response.content, Content::text("Hello, World!"));
    }

    #[tokio::test]
    async fn echo_accepts_flat_and_nested_input() {
        let rt = runtime();
        let flat = rt.execute(request("echo", json!({"text": "hi"}))).await;
        assert_eq!(flat.content, Content::text("Echo: hi"));

        let nested = rt.execute(request("echo", json!({"input": {"text": "hi"}}))).await;
        assert_eq!(nested.content, Content::text("Echo: hi"));
    }

    #[tokio::test]
    async fn echo_rejects_wrong_type() {
        let response = runtime().execute(request("echo", json!({"text": ["a"]}))).await;
        assert_eq!(response.error_kind, Some(ErrorKind::Validation));
        assert!(response.error.unwrap().contains("text: expected string"));
    }

    #[tokio::test]
    async fn count_to() {
        let rt = runtime();
        let response = rt.execute(request("count_to", json!({"number": 5}))).await;
        assert_eq!(response.content, Content::text("1, 2, 3, 4, 5"));

        let response = rt.execute(request("count_to", json!({"number": 0}))).await;
        assert_eq!(response.content, Content::text(""));
    }
}
