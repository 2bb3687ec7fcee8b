//! Typed render contexts for each template

use serde::Serialize;
use serde_json::Value;

use crate::domain::{ExecutionResult, Plan, Step};
use crate::tools::ToolDescriptor;

/// Placeholder syntax shown to the planner; rendered as data so handlebars leaves it alone
pub const REFERENCE_SYNTAX: &str = "{{stepId.field}}";

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Tool as presented to the planner
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub input_schema: String,
    pub output_schema: String,
}

impl From<&ToolDescriptor> for ToolSummary {
    fn from(tool: &ToolDescriptor) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: pretty(&tool.input_schema),
            output_schema: pretty(&tool.output_schema),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanContext {
    pub goal: String,
    pub tools: Vec<ToolSummary>,
    pub feedback: Option<String>,
    pub reference_syntax: &'static str,
}

impl PlanContext {
    pub fn new(goal: &str, tools: &[ToolDescriptor], feedback: Option<&str>) -> Self {
        Self {
            goal: goal.to_string(),
            tools: tools.iter().map(ToolSummary::from).collect(),
            feedback: feedback.map(str::to_string),
            reference_syntax: REFERENCE_SYNTAX,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PrecedingStep {
    pub step_id: String,
    pub tool: String,
    pub fields: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegenerateContext {
    pub goal: String,
    pub plan: String,
    pub step: String,
    pub step_id: String,
    pub error: String,
    pub placeholder: Option<String>,
    pub available_fields: Vec<String>,
    pub preceding: Vec<PrecedingStep>,
    pub tools: Vec<ToolSummary>,
    pub reference_syntax: &'static str,
}

impl RegenerateContext {
    pub fn new(
        goal: &str,
        plan: &Plan,
        step: &Step,
        error: &str,
        placeholder: Option<&str>,
        available_fields: &[String],
        tools: &[ToolDescriptor],
    ) -> Self {
        let preceding = plan
            .preceding(&step.step_id)
            .iter()
            .map(|s| PrecedingStep {
                step_id: s.step_id.clone(),
                tool: s.tool.clone(),
                fields: s.declared_output_fields().unwrap_or_default().join(", "),
            })
            .collect();
        Self {
            goal: goal.to_string(),
            plan: serde_json::to_string_pretty(plan).unwrap_or_default(),
            step: serde_json::to_string_pretty(step).unwrap_or_default(),
            step_id: step.step_id.clone(),
            error: error.to_string(),
            placeholder: placeholder.map(str::to_string),
            available_fields: available_fields.to_vec(),
            preceding,
            tools: tools.iter().map(ToolSummary::from).collect(),
            reference_syntax: REFERENCE_SYNTAX,
        }
    }
}

/// Output of an earlier step shown as context
#[derive(Debug, Clone, Serialize)]
pub struct PriorOutput {
    pub step_id: String,
    pub tool: String,
    pub output: String,
}

impl PriorOutput {
    /// Render a result's output (or skip fallback), truncated to `max_chars`
    pub fn from_result(result: &ExecutionResult, max_chars: usize) -> Option<Self> {
        let value = if result.success {
            result.output.as_ref()
        } else {
            result.fallback.as_ref()
        }?;
        Some(Self {
            step_id: result.step_id.clone(),
            tool: result.tool_name.clone(),
            output: truncate_chars(&pretty(value), max_chars),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentContext {
    pub goal: String,
    pub reason: String,
    pub tool: String,
    pub content_field: String,
    pub input: String,
    pub prior_outputs: Vec<PriorOutput>,
    pub open_tag: String,
    pub close_tag: String,
}

/// One result line in the final answer prompt
#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub step_id: String,
    pub tool: String,
    pub status: &'static str,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ResultSummary {
    pub fn from_result(result: &ExecutionResult, max_chars: usize) -> Self {
        let status = if result.success {
            "success"
        } else if result.skipped {
            "skipped"
        } else {
            "failed"
        };
        Self {
            step_id: result.step_id.clone(),
            tool: result.tool_name.clone(),
            status,
            output: result.output.as_ref().map(|o| truncate_chars(&pretty(o), max_chars)),
            error: result.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalAnswerContext {
    pub goal: String,
    pub results: Vec<ResultSummary>,
    pub open_marker: String,
    pub close_marker: String,
}

/// Truncate on a char boundary, marking the cut
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}... [truncated]", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 10), "héllo");
        assert_eq!(truncate_chars("héllo", 2), "hé... [truncated]");
        assert_eq!(truncate_chars("abc", 0), "abc");
    }

    #[test]
    fn test_result_summary_status() {
        let ok = ExecutionResult::success("s1", "search", json!({}), json!({"a": 1}));
        let summary = ResultSummary::from_result(&ok, 100);
        assert_eq!(summary.status, "success");
        assert!(summary.output.unwrap().contains("\"a\": 1"));
    }
}
