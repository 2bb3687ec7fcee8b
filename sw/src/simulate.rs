//! Dry-run tool registry
//!
//! [`SchemaStubRegistry`] answers every call with a value shaped like the
//! output schema the plan declared for that tool, so a plan can be executed
//! end to end without any real tool behind it.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::domain::Plan;
use crate::tools::{ToolDescriptor, ToolError, ToolRegistry};

pub struct SchemaStubRegistry {
    descriptors: Vec<ToolDescriptor>,
    failing: HashSet<String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl SchemaStubRegistry {
    /// One descriptor per tool the plan uses
    ///
    /// A tool used by several steps gets the union of their declared output
    /// properties; the first declaration of a property wins.
    pub fn from_plan(plan: &Plan) -> Self {
        debug!(steps = plan.len(), "SchemaStubRegistry::from_plan: called");
        let mut order: Vec<String> = Vec::new();
        let mut properties: HashMap<String, Map<String, Value>> = HashMap::new();
        for step in &plan.steps {
            let merged = properties.entry(step.tool.clone()).or_insert_with(|| {
                order.push(step.tool.clone());
                Map::new()
            });
            if let Some(props) = step.output_schema.get("properties").and_then(Value::as_object) {
                for (name, schema) in props {
                    merged.entry(name.clone()).or_insert_with(|| schema.clone());
                }
            }
        }

        let descriptors = order
            .into_iter()
            .map(|tool| {
                let props = properties.remove(&tool).unwrap_or_default();
                ToolDescriptor::new(tool.clone(), format!("Simulated {}", tool))
                    .with_output_schema(json!({ "type": "object", "properties": props }))
            })
            .collect();
        Self::with_descriptors(descriptors)
    }

    pub fn with_descriptors(descriptors: Vec<ToolDescriptor>) -> Self {
        Self {
            descriptors,
            failing: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every call to `name` fails
    pub fn fail_tool(mut self, name: impl Into<String>) -> Self {
        self.failing.insert(name.into());
        self
    }

    /// Calls received so far, in order
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ToolRegistry for SchemaStubRegistry {
    async fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.descriptors.clone()
    }

    async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        debug!(tool_name = %name, "SchemaStubRegistry::call: called");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((name.to_string(), args));
        }
        let Some(descriptor) = self.descriptors.iter().find(|d| d.name == name) else {
            return Err(ToolError::UnknownTool { name: name.to_string() });
        };
        if self.failing.contains(name) {
            info!(tool_name = %name, "Simulated tool failure");
            return Err(ToolError::failed("simulated failure"));
        }
        Ok(stub_value("result", &descriptor.output_schema))
    }
}

/// A value matching `schema`; `field` names string stubs
pub fn stub_value(field: &str, schema: &Value) -> Value {
    match schema.get("type").and_then(Value::as_str) {
        Some("string") => Value::String(format!("stub-{}", field)),
        Some("number") | Some("integer") => json!(0),
        Some("boolean") => Value::Bool(true),
        Some("array") => {
            let items = schema.get("items").cloned().unwrap_or_else(|| json!({ "type": "string" }));
            Value::Array(vec![stub_value(field, &items)])
        }
        Some("null") => Value::Null,
        _ => {
            let props = schema.get("properties").and_then(Value::as_object);
            let object: Map<String, Value> = props
                .into_iter()
                .flatten()
                .map(|(name, prop)| (name.clone(), stub_value(name, prop)))
                .collect();
            Value::Object(object)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Step;

    fn plan() -> Plan {
        Plan::new(vec![
            Step::new("s1", "search", json!({"q": "rust"})).with_output_schema(json!({
                "type": "object",
                "properties": {
                    "urls": { "type": "array", "items": { "type": "string" } },
                    "total": { "type": "integer" }
                }
            })),
            Step::new("s2", "fetch", json!({"url": "{{s1.urls}}"})).with_output_fields(&["body"]),
            Step::new("s3", "search", json!({"q": "tokio"})).with_output_schema(json!({
                "type": "object",
                "properties": { "exhaustive": { "type": "boolean" } }
            })),
        ])
    }

    #[tokio::test]
    async fn test_from_plan_merges_output_properties() {
        let registry = SchemaStubRegistry::from_plan(&plan());
        let names: Vec<String> = registry.list_tools().await.into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["search", "fetch"]);

        let output = registry.call("search", json!({"q": "x"})).await.unwrap();
        assert_eq!(output, json!({"urls": ["stub-urls"], "total": 0, "exhaustive": true}));
        assert_eq!(registry.call("fetch", json!({})).await.unwrap(), json!({"body": "stub-body"}));
    }

    #[tokio::test]
    async fn test_fail_tool_and_unknown() {
        let registry = SchemaStubRegistry::from_plan(&plan()).fail_tool("fetch");
        let err = registry.call("fetch", json!({"url": "a"})).await.unwrap_err();
        assert_eq!(err.to_string(), "simulated failure");
        assert!(matches!(
            registry.call("teleport", json!({})).await,
            Err(ToolError::UnknownTool { .. })
        ));
        assert_eq!(registry.calls().len(), 2);
    }

    #[test]
    fn test_stub_nested_object() {
        let schema = json!({
            "type": "object",
            "properties": { "meta": { "type": "object", "properties": { "title": { "type": "string" } } } }
        });
        assert_eq!(stub_value("result", &schema), json!({"meta": {"title": "stub-title"}}));
        assert_eq!(stub_value("x", &json!({})), json!({}));
    }
}
