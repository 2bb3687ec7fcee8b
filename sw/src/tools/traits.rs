//! Tool trait and descriptor

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ToolError;

/// How the orchestrator treats a tool
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolKind {
    /// Performs an action; called with the resolved input as-is
    #[default]
    Action,
    /// Produces prose/markup from upstream context; `content_field` is filled
    /// by a generation sub-step before the call
    ContentGeneration { content_field: String },
}

/// Declared contract of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    #[serde(default = "empty_object_schema")]
    pub output_schema: Value,
    #[serde(default)]
    pub kind: ToolKind,
    /// Accepts one invocation per element when a scalar parameter receives an array
    #[serde(default)]
    pub batched: bool,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        debug!(%name, "ToolDescriptor::new: called");
        Self {
            name,
            description: description.into(),
            input_schema: empty_object_schema(),
            output_schema: empty_object_schema(),
            kind: ToolKind::Action,
            batched: false,
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_kind(mut self, kind: ToolKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn batched(mut self) -> Self {
        self.batched = true;
        self
    }

    /// Field receiving generated content, for content-generation tools
    pub fn content_field(&self) -> Option<&str> {
        match &self.kind {
            ToolKind::ContentGeneration { content_field } => Some(content_field),
            ToolKind::Action => None,
        }
    }

    /// Declared JSON type of a top-level input parameter
    pub fn parameter_type(&self, parameter: &str) -> Option<&str> {
        self.input_schema
            .get("properties")
            .and_then(|props| props.get(parameter))
            .and_then(|prop| prop.get("type"))
            .and_then(Value::as_str)
    }

    /// True when the parameter is declared with a scalar JSON type
    pub fn expects_scalar(&self, parameter: &str) -> bool {
        matches!(
            self.parameter_type(parameter),
            Some("string" | "number" | "integer" | "boolean")
        )
    }
}

/// An in-process tool hosted by [`super::LocalToolRegistry`]
#[async_trait]
pub trait Tool: Send + Sync {
    /// Declared contract (name, schemas, kind)
    fn descriptor(&self) -> ToolDescriptor;

    /// Execute the tool with resolved arguments
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}
