//! Plan and Step - the LLM-authored tool-call plan

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::placeholder::{PlaceholderReference, references_in};

/// One planned tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Unique id within the plan, e.g. `s1` or `step2`
    #[serde(alias = "stepId", alias = "id")]
    pub step_id: String,

    /// Tool to invoke
    pub tool: String,

    /// Tool arguments; string leaves may contain `{{stepN.field}}` placeholders
    #[serde(rename = "input", alias = "raw_input", alias = "rawInput", default)]
    pub raw_input: Value,

    /// Declared output shape; must be an object schema
    #[serde(alias = "outputSchema", default)]
    pub output_schema: Value,

    /// Why the planner chose this step
    #[serde(default)]
    pub reason: String,
}

impl Step {
    /// Create a step with an empty object output schema
    pub fn new(step_id: impl Into<String>, tool: impl Into<String>, raw_input: Value) -> Self {
        let step_id = step_id.into();
        let tool = tool.into();
        debug!(%step_id, %tool, "Step::new: called");
        Self {
            step_id,
            tool,
            raw_input,
            output_schema: serde_json::json!({ "type": "object" }),
            reason: String::new(),
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Declare the output as an object with the given string-typed fields
    pub fn with_output_fields(self, fields: &[&str]) -> Self {
        let properties: serde_json::Map<String, Value> = fields
            .iter()
            .map(|f| (f.to_string(), serde_json::json!({ "type": "string" })))
            .collect();
        self.with_output_schema(serde_json::json!({ "type": "object", "properties": properties }))
    }

    /// Every well-formed placeholder reference in the raw input
    pub fn references(&self) -> Vec<PlaceholderReference> {
        references_in(&self.raw_input)
    }

    /// Field names declared under `output_schema.properties`, if any
    pub fn declared_output_fields(&self) -> Option<Vec<String>> {
        self.output_schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
    }
}

/// Full ordered set of intended tool calls for one goal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        debug!(step_count = steps.len(), "Plan::new: called");
        Self { steps }
    }

    /// Parse a plan from JSON; accepts `{"steps": [...]}` or a bare step array
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        debug!(len = text.len(), "Plan::from_json: called");
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::Array(_) => {
                debug!("Plan::from_value: bare step array");
                Ok(Self {
                    steps: serde_json::from_value(value)?,
                })
            }
            other => serde_json::from_value(other),
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Declaration index of a step
    pub fn position(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step_id == step_id)
    }

    /// Steps declared before the given step
    pub fn preceding(&self, step_id: &str) -> &[Step] {
        match self.position(step_id) {
            Some(idx) => &self.steps[..idx],
            None => &[],
        }
    }

    /// Swap in a regenerated definition for an existing step id
    ///
    /// Returns false when no step carries that id.
    pub fn replace_step(&mut self, step: Step) -> bool {
        debug!(step_id = %step.step_id, "Plan::replace_step: called");
        match self.steps.iter_mut().find(|s| s.step_id == step.step_id) {
            Some(slot) => {
                *slot = step;
                true
            }
            None => {
                debug!("Plan::replace_step: step not found");
                false
            }
        }
    }

    pub fn step_ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.step_id.clone()).collect()
    }
}
