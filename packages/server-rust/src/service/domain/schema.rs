//! Demo operations taking schema-validated input.

use opdispatch_core::{FieldDef, FieldKind, InputSchema, OutputKind, Schema};
use serde::Deserialize;
use serde_json::json;

use crate::service::descriptor::{OperationSpec, Registrar, ServiceGroup};
use crate::service::operation::{Call, OperationResult};

/// A person to greet.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PersonSchema {
    pub name: String,
    pub age: i64,
    #[serde(default)]
    pub email: Option<String>,
}

impl InputSchema for PersonSchema {
    fn schema() -> Schema {
        Schema::new("PersonSchema")
            .describe("Schema representing a person")
            .field(FieldDef::string("name").describe("Person's name"))
            .field(FieldDef::integer("age").describe("Person's age"))
            .field(
                FieldDef::string("email")
                    .default_value(serde_json::Value::Null)
                    .describe("Person's email address"),
            )
    }
}

/// A message with a repetition count between 1 and 10.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MessageSchema {
    pub text: String,
    pub repeat: u64,
}

impl InputSchema for MessageSchema {
    fn schema() -> Schema {
        Schema::new("MessageSchema")
            .describe("Schema for a message with repetition")
            .field(FieldDef::string("text").describe("Message text"))
            .field(
                FieldDef::integer("repeat")
                    .default_value(json!(1))
                    .min(1.0)
                    .max(10.0)
                    .describe("Number of times to repeat the message"),
            )
    }
}

/// A list of items to prefix and optionally upper-case.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ListProcessingSchema {
    pub items: Vec<String>,
    pub prefix: Option<String>,
    pub uppercase: bool,
}

impl InputSchema for ListProcessingSchema {
    fn schema() -> Schema {
        Schema::new("ListProcessingSchema")
            .describe("Schema for processing a list of items")
            .field(FieldDef::array("items", FieldKind::String).describe("List of items to process"))
            .field(
                FieldDef::string("prefix")
                    .default_value(json!("Item:"))
                    .nullable()
                    .describe("Prefix to add to each item"),
            )
            .field(
                FieldDef::boolean("uppercase")
                    .default_value(json!(false))
                    .describe("Whether to convert items to uppercase"),
            )
    }
}

/// Operations demonstrating schema-bound input.
#[derive(Debug, Default)]
pub struct SchemaGroup;

impl SchemaGroup {
    async fn greet_person(&mut self, call: Call) -> OperationResult {
        let person: PersonSchema = call.input()?;
        let mut greeting = format!("Hello, {}! ", person.name);
        if person.age != 0 {
            greeting.push_str(&format!("You are {} years old. ", person.age));
        }
        if let Some(email) = person.email.filter(|e| !e.is_empty()) {
            greeting.push_str(&format!("Your email is {email}."));
        }
        Ok(json!(greeting))
    }

    async fn repeat_message(&mut self, call: Call) -> OperationResult {
        let message: MessageSchema = call.input()?;
        call.info(&format!("Repeating message {} times", message.repeat));
        let mut parts = Vec::new();
        for i in 0..message.repeat {
            if let Some(ctx) = call.context() {
                ctx.report_progress(i + 1, message.repeat);
            }
            parts.push(message.text.as_str());
        }
        Ok(json!(parts.join(" ")))
    }

    async fn process_list(&mut self, call: Call) -> OperationResult {
        let data: ListProcessingSchema = call.input()?;
        let processed: Vec<String> = data
            .items
            .iter()
            .map(|item| {
                let item = if data.uppercase { item.to_uppercase() } else { item.clone() };
                match &data.prefix {
                    Some(prefix) => format!("{prefix} {item}"),
                    None => item,
                }
            })
            .collect();
        Ok(json!(processed))
    }
}

impl ServiceGroup for SchemaGroup {
    fn register(r: &mut Registrar<Self>) {
        r.operation(
            OperationSpec::new("greet_person", |g: &mut Self, c| Box::pin(g.greet_person(c)))
                .param("person", "PersonSchema")
                .schema::<PersonSchema>()
                .doc("Greet a person based on their information."),
        )
        .operation(
            OperationSpec::new("repeat_message", |g: &mut Self, c| Box::pin(g.repeat_message(c)))
                .param("message", "MessageSchema")
                .param("ctx", "Context")
                .schema::<MessageSchema>()
                .doc("Repeat a message a number of times, reporting progress."),
        )
        .operation(
            OperationSpec::new("process_list", |g: &mut Self, c| Box::pin(g.process_list(c)))
                .param("data", "ListProcessingSchema")
                .schema::<ListProcessingSchema>()
                .output(OutputKind::Structured)
                .doc("Prefix every item of a list, optionally upper-cased."),
        );
    }
}
