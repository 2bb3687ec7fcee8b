//! Planner - obtains plans and single-step replacements from a text generator
//!
//! The orchestrator depends on the [`Planner`] trait only. [`LlmPlanner`]
//! renders the `plan` and `regenerate_step` prompts, asks the generator for
//! JSON and parses the reply into domain types.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Plan, Step};
use crate::error::StepFailure;
use crate::llm::{GenerationRequest, LlmError, TextGenerator};
use crate::prompts::{PlanContext, PromptError, PromptRenderer, RegenerateContext};
use crate::tools::ToolDescriptor;

const PLANNER_SYSTEM_PROMPT: &str = "You produce machine-readable tool-call plans. Reply with JSON only.";

/// Request for a complete plan
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub goal: String,
    pub tools: Vec<ToolDescriptor>,
    /// Validation errors from the previous attempt, one per line
    pub feedback: Option<String>,
}

impl PlanRequest {
    pub fn new(goal: impl Into<String>, tools: Vec<ToolDescriptor>) -> Self {
        Self {
            goal: goal.into(),
            tools,
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }
}

/// Request for a replacement of one failed step
#[derive(Debug, Clone)]
pub struct RegenerateRequest {
    pub goal: String,
    pub plan: Plan,
    pub step: Step,
    pub failure: StepFailure,
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("Could not parse planner output: {0}")]
    Parse(String),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Planning capability
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce a full plan for the goal
    async fn plan(&self, request: PlanRequest) -> Result<Plan, PlanningError>;

    /// Produce a replacement for `request.step`
    ///
    /// Callers force the original step id onto the result.
    async fn regenerate_step(&self, request: RegenerateRequest) -> Result<Step, PlanningError>;
}

/// Planner backed by a [`TextGenerator`]
pub struct LlmPlanner {
    generator: Arc<dyn TextGenerator>,
    renderer: PromptRenderer,
    max_tokens: u32,
}

impl LlmPlanner {
    pub fn new(generator: Arc<dyn TextGenerator>, renderer: PromptRenderer) -> Self {
        Self {
            generator,
            renderer,
            max_tokens: 4096,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn ask(&self, prompt: String) -> Result<Value, PlanningError> {
        let request = GenerationRequest::new(prompt)
            .with_system_prompt(PLANNER_SYSTEM_PROMPT)
            .with_max_tokens(self.max_tokens);
        let text = self.generator.generate(request).await?;
        debug!(len = text.len(), "LlmPlanner::ask: got response");
        extract_json(&text)
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, request: PlanRequest) -> Result<Plan, PlanningError> {
        debug!(goal = %request.goal, has_feedback = request.feedback.is_some(), "LlmPlanner::plan: called");
        let context = PlanContext::new(&request.goal, &request.tools, request.feedback.as_deref());
        let prompt = self.renderer.render("plan", &context)?;
        let value = self.ask(prompt).await?;
        let plan = Plan::from_value(value).map_err(|e| PlanningError::Parse(e.to_string()))?;
        info!(steps = plan.len(), "Planner produced plan");
        Ok(plan)
    }

    async fn regenerate_step(&self, request: RegenerateRequest) -> Result<Step, PlanningError> {
        debug!(step_id = %request.step.step_id, "LlmPlanner::regenerate_step: called");
        let context = RegenerateContext::new(
            &request.goal,
            &request.plan,
            &request.step,
            &request.failure.message,
            request.failure.placeholder.as_deref(),
            &request.failure.available_fields,
            &request.tools,
        );
        let prompt = self.renderer.render("regenerate_step", &context)?;
        let value = self.ask(prompt).await?;

        // some models wrap the single step as {"step": {...}} or {"steps": [...]}
        let value = match value {
            Value::Object(mut obj) if obj.contains_key("step") => obj.remove("step").unwrap_or(Value::Null),
            Value::Object(mut obj) if obj.contains_key("steps") => match obj.remove("steps") {
                Some(Value::Array(mut steps)) if !steps.is_empty() => steps.remove(0),
                _ => Value::Null,
            },
            other => other,
        };
        let step: Step = serde_json::from_value(value).map_err(|e| PlanningError::Parse(e.to_string()))?;
        info!(step_id = %step.step_id, tool = %step.tool, "Planner produced replacement step");
        Ok(step)
    }
}

/// Pull a JSON value out of model output
///
/// Prefers a fenced ```json block, then the outermost `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Result<Value, PlanningError> {
    debug!(len = text.len(), "extract_json: called");
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```")
            && let Ok(value) = serde_json::from_str(body[..end].trim())
        {
            debug!("extract_json: parsed fenced block");
            return Ok(value);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close))
            && start < end
            && let Ok(value) = serde_json::from_str(&trimmed[start..=end])
        {
            debug!(%open, "extract_json: parsed delimited span");
            return Ok(value);
        }
    }

    Err(PlanningError::Parse("no JSON object found in response".to_string()))
}
