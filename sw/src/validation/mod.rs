//! Plan validation
//!
//! Structural checks run before any step executes. There is no automatic
//! repair: any error rejects the whole plan and the orchestrator asks the
//! planner for a new one, passing the issues back as feedback.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Plan, Step};
use crate::graph::{DependencyGraph, GraphError};
use crate::placeholder::{embedded_placeholders, scan_value};

/// Category of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationErrorType {
    EmptyPlan,
    MissingStepId,
    DuplicateStepId,
    MissingTool,
    UnknownTool,
    InvalidOutputSchema,
    ArrayOutputSchema,
    MalformedPlaceholder,
    SelfReference,
    ForwardReference,
    UnknownStepReference,
    NestedFieldPath,
    UnknownOutputField,
    DependencyCycle,
    // warnings
    UndeclaredOutputFields,
    EmbeddedPlaceholder,
    MissingReason,
}

impl ValidationErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPlan => "empty-plan",
            Self::MissingStepId => "missing-step-id",
            Self::DuplicateStepId => "duplicate-step-id",
            Self::MissingTool => "missing-tool",
            Self::UnknownTool => "unknown-tool",
            Self::InvalidOutputSchema => "invalid-output-schema",
            Self::ArrayOutputSchema => "array-output-schema",
            Self::MalformedPlaceholder => "malformed-placeholder",
            Self::SelfReference => "self-reference",
            Self::ForwardReference => "forward-reference",
            Self::UnknownStepReference => "unknown-step-reference",
            Self::NestedFieldPath => "nested-field-path",
            Self::UnknownOutputField => "unknown-output-field",
            Self::DependencyCycle => "dependency-cycle",
            Self::UndeclaredOutputFields => "undeclared-output-fields",
            Self::EmbeddedPlaceholder => "embedded-placeholder",
            Self::MissingReason => "missing-reason",
        }
    }
}

impl fmt::Display for ValidationErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding, error or warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub error_type: ValidationErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    fn new(step_id: Option<&str>, error_type: ValidationErrorType, message: impl Into<String>) -> Self {
        Self {
            step_id: step_id.map(str::to_string),
            error_type,
            message: message.into(),
            suggestion: None,
        }
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(step_id) = &self.step_id {
            write!(f, "[{}] ", step_id)?;
        }
        write!(f, "{}: {}", self.error_type, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (suggestion: {})", suggestion)?;
        }
        Ok(())
    }
}

/// Outcome of validating a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn finish(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Errors formatted one per line, for the planner's retry prompt
    pub fn feedback(&self) -> String {
        self.errors
            .iter()
            .map(|issue| format!("- {}", issue))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_result(self) -> Result<Vec<ValidationIssue>, PlanValidationError> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(PlanValidationError { issues: self.errors })
        }
    }
}

/// A plan rejected wholesale
#[derive(Debug, Clone, Error)]
#[error("Plan failed validation with {} error(s): {}", issues.len(), summarize(issues))]
pub struct PlanValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; ")
}

/// Structural validator for candidate plans
#[derive(Debug, Clone, Default)]
pub struct PlanValidator {
    known_tools: Option<HashSet<String>>,
}

impl PlanValidator {
    /// Validator without a tool catalog; tool names are not checked
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reject tools missing from the catalog
    pub fn with_known_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn validate(&self, plan: &Plan) -> ValidationReport {
        debug!(step_count = plan.len(), "PlanValidator::validate: called");
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if plan.is_empty() {
            errors.push(ValidationIssue::new(
                None,
                ValidationErrorType::EmptyPlan,
                "Plan contains no steps",
            ));
            return ValidationReport::finish(errors, warnings);
        }

        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (idx, step) in plan.steps.iter().enumerate() {
            if !step.step_id.is_empty() && positions.contains_key(step.step_id.as_str()) {
                errors.push(
                    ValidationIssue::new(
                        Some(&step.step_id),
                        ValidationErrorType::DuplicateStepId,
                        format!("Step id '{}' is declared more than once", step.step_id),
                    )
                    .suggest("Give every step a unique id such as s1, s2, s3"),
                );
                continue;
            }
            positions.insert(step.step_id.as_str(), idx);
        }

        for (idx, step) in plan.steps.iter().enumerate() {
            self.check_step(step, idx, &plan.steps, &positions, &mut errors, &mut warnings);
        }

        if errors.is_empty()
            && let Err(GraphError::Cycle { path }) = DependencyGraph::build(plan)
        {
            errors.push(ValidationIssue::new(
                path.first().map(String::as_str),
                ValidationErrorType::DependencyCycle,
                format!("Dependency cycle: {}", path.join(" -> ")),
            ));
        }

        let report = ValidationReport::finish(errors, warnings);
        info!(
            valid = report.valid,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Plan validated"
        );
        report
    }

    /// Validate a single (regenerated) step against the steps it may reference
    pub fn validate_step(&self, step: &Step, preceding: &[Step]) -> ValidationReport {
        debug!(step_id = %step.step_id, preceding = preceding.len(), "PlanValidator::validate_step: called");
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let mut steps: Vec<Step> = preceding.to_vec();
        steps.push(step.clone());
        let positions: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.step_id.as_str(), idx))
            .collect();

        if preceding.iter().any(|s| s.step_id == step.step_id) {
            errors.push(ValidationIssue::new(
                Some(&step.step_id),
                ValidationErrorType::DuplicateStepId,
                format!("Step id '{}' is already used by an earlier step", step.step_id),
            ));
        }
        self.check_step(step, preceding.len(), &steps, &positions, &mut errors, &mut warnings);
        ValidationReport::finish(errors, warnings)
    }

    fn check_step(
        &self,
        step: &Step,
        idx: usize,
        steps: &[Step],
        positions: &HashMap<&str, usize>,
        errors: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationIssue>,
    ) {
        debug!(step_id = %step.step_id, idx, "PlanValidator::check_step: called");
        let id = step.step_id.as_str();
        let label = (!id.is_empty()).then_some(id);

        if id.trim().is_empty() {
            errors.push(
                ValidationIssue::new(None, ValidationErrorType::MissingStepId, format!("Step #{} has no step id", idx + 1))
                    .suggest(format!("Use an id such as s{}", idx + 1)),
            );
        }

        if step.tool.trim().is_empty() {
            errors.push(ValidationIssue::new(label, ValidationErrorType::MissingTool, "Step names no tool"));
        } else if let Some(known) = &self.known_tools
            && !known.contains(&step.tool)
        {
            let mut names: Vec<&str> = known.iter().map(String::as_str).collect();
            names.sort();
            errors.push(
                ValidationIssue::new(
                    label,
                    ValidationErrorType::UnknownTool,
                    format!("Tool '{}' is not available", step.tool),
                )
                .suggest(format!("Available tools: {}", names.join(", "))),
            );
        }

        if let Some(issue) = check_output_schema(label, &step.output_schema) {
            errors.push(issue);
        }

        if step.reason.trim().is_empty() {
            warnings.push(ValidationIssue::new(
                label,
                ValidationErrorType::MissingReason,
                "Step gives no reason",
            ));
        }

        for placeholder in scan_value(&step.raw_input) {
            let Some(reference) = placeholder.reference else {
                errors.push(
                    ValidationIssue::new(
                        label,
                        ValidationErrorType::MalformedPlaceholder,
                        format!("Placeholder {} is not of the form {{{{stepId.field}}}}", placeholder.raw),
                    )
                    .suggest("Reference a prior step's output field, e.g. {{s1.results}}"),
                );
                continue;
            };

            let source = reference.source_step_id.as_str();
            if source == id {
                errors.push(ValidationIssue::new(
                    label,
                    ValidationErrorType::SelfReference,
                    format!("{} references the step's own output", reference.raw),
                ));
                continue;
            }

            match positions.get(source) {
                None => {
                    errors.push(ValidationIssue::new(
                        label,
                        ValidationErrorType::UnknownStepReference,
                        format!("{} references step '{}', which is not declared before this step", reference.raw, source),
                    ));
                    continue;
                }
                Some(&pos) if pos >= idx => {
                    errors.push(
                        ValidationIssue::new(
                            label,
                            ValidationErrorType::ForwardReference,
                            format!("{} references step '{}', which is declared later", reference.raw, source),
                        )
                        .suggest("Reorder the steps so dependencies come first"),
                    );
                    continue;
                }
                Some(_) => {}
            }

            if !reference.is_direct_field() {
                errors.push(
                    ValidationIssue::new(
                        label,
                        ValidationErrorType::NestedFieldPath,
                        format!(
                            "{} uses a nested path; only direct output field names can be referenced",
                            reference.raw
                        ),
                    )
                    .suggest(reference.flattened()),
                );
                continue;
            }

            let Some(source_step) = steps[..idx].iter().find(|s| s.step_id == source) else {
                continue;
            };
            match source_step.declared_output_fields() {
                Some(fields) if !fields.contains(&reference.field_path) => {
                    errors.push(
                        ValidationIssue::new(
                            label,
                            ValidationErrorType::UnknownOutputField,
                            format!(
                                "{} names field '{}', which step '{}' does not declare",
                                reference.raw, reference.field_path, source
                            ),
                        )
                        .suggest(format!("Declared fields: {}", fields.join(", "))),
                    );
                }
                Some(_) => {}
                None => warnings.push(ValidationIssue::new(
                    label,
                    ValidationErrorType::UndeclaredOutputFields,
                    format!(
                        "Step '{}' declares no output properties; {} cannot be checked",
                        source, reference.raw
                    ),
                )),
            }
        }

        for text in embedded_placeholders(&step.raw_input) {
            warnings.push(ValidationIssue::new(
                label,
                ValidationErrorType::EmbeddedPlaceholder,
                format!("Placeholder inside \"{}\" will be inserted as text", text),
            ));
        }
    }
}

/// Object schema check; arrays must be wrapped in an object
fn check_output_schema(label: Option<&str>, schema: &Value) -> Option<ValidationIssue> {
    let wrap_hint = r#"{"type": "object", "properties": {"results": {"type": "array"}}}"#;
    let Some(obj) = schema.as_object() else {
        return Some(
            ValidationIssue::new(
                label,
                ValidationErrorType::InvalidOutputSchema,
                "Output schema is missing or not a JSON object",
            )
            .suggest(r#"{"type": "object", "properties": {...}}"#),
        );
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("object") => None,
        None if obj.contains_key("properties") => None,
        Some("array") => Some(
            ValidationIssue::new(
                label,
                ValidationErrorType::ArrayOutputSchema,
                "Output schema is a bare array; outputs must be objects",
            )
            .suggest(format!("Wrap the array in a field: {}", wrap_hint)),
        ),
        other => Some(ValidationIssue::new(
            label,
            ValidationErrorType::InvalidOutputSchema,
            format!("Output schema type must be 'object', found {}", other.unwrap_or("none")),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn search() -> Step {
        Step::new("s1", "search", json!({"q": "x"}))
            .with_output_fields(&["results"])
            .with_reason("find pages")
    }

    fn fetch(input: Value) -> Step {
        Step::new("s2", "fetch", input)
            .with_output_fields(&["pages"])
            .with_reason("read pages")
    }

    fn error_types(report: &ValidationReport) -> Vec<ValidationErrorType> {
        report.errors.iter().map(|e| e.error_type).collect()
    }

    #[test]
    fn test_valid_plan() {
        let plan = Plan::new(vec![search(), fetch(json!({"urls": "{{s1.results}}"}))]);
        let report = PlanValidator::new().validate(&plan);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_empty_plan() {
        let report = PlanValidator::new().validate(&Plan::default());
        assert_eq!(error_types(&report), vec![ValidationErrorType::EmptyPlan]);
    }

    #[test]
    fn test_output_wrapper_rejected() {
        let plan = Plan::new(vec![search(), fetch(json!({"urls": "{{s1.output.results}}"}))]);
        let report = PlanValidator::new().validate(&plan);
        assert!(!report.valid);
        assert_eq!(error_types(&report), vec![ValidationErrorType::NestedFieldPath]);
        assert_eq!(report.errors[0].suggestion.as_deref(), Some("{{s1.results}}"));
    }

    #[test]
    fn test_forward_and_self_references() {
        let plan = Plan::new(vec![
            Step::new("s1", "search", json!({"q": "{{s2.pages}}"})).with_reason("r"),
            fetch(json!({"urls": "{{s2.pages}}"})),
        ]);
        let report = PlanValidator::new().validate(&plan);
        assert_eq!(
            error_types(&report),
            vec![ValidationErrorType::ForwardReference, ValidationErrorType::SelfReference]
        );
    }

    #[test]
    fn test_unknown_step_and_field() {
        let plan = Plan::new(vec![search(), fetch(json!({"a": "{{s9.x}}", "b": "{{s1.links}}"}))]);
        let report = PlanValidator::new().validate(&plan);
        assert_eq!(
            error_types(&report),
            vec![ValidationErrorType::UnknownStepReference, ValidationErrorType::UnknownOutputField]
        );
        assert!(report.errors[1].suggestion.as_deref().unwrap().contains("results"));
    }

    #[test]
    fn test_array_schema_and_malformed_placeholder() {
        let plan = Plan::new(vec![
            Step::new("s1", "search", json!({"q": "{{nonsense}}"}))
                .with_output_schema(json!({"type": "array", "items": {"type": "string"}}))
                .with_reason("r"),
        ]);
        let report = PlanValidator::new().validate(&plan);
        let types = error_types(&report);
        assert!(types.contains(&ValidationErrorType::ArrayOutputSchema));
        assert!(types.contains(&ValidationErrorType::MalformedPlaceholder));
    }

    #[test]
    fn test_missing_fields_and_duplicates() {
        let plan = Plan::new(vec![
            Step::new("", "", json!({})).with_reason("r"),
            search(),
            search(),
        ]);
        let types = error_types(&PlanValidator::new().validate(&plan));
        assert!(types.contains(&ValidationErrorType::MissingStepId));
        assert!(types.contains(&ValidationErrorType::MissingTool));
        assert!(types.contains(&ValidationErrorType::DuplicateStepId));
    }

    #[test]
    fn test_unknown_tool_with_catalog() {
        let plan = Plan::new(vec![search()]);
        let report = PlanValidator::new().with_known_tools(["fetch"]).validate(&plan);
        assert_eq!(error_types(&report), vec![ValidationErrorType::UnknownTool]);
        assert!(PlanValidator::new().with_known_tools(["search"]).validate(&plan).valid);
    }

    #[test]
    fn test_warnings_do_not_block() {
        let plan = Plan::new(vec![
            Step::new("s1", "search", json!({"q": "x"})),
            Step::new("s2", "write", json!({"title": "Report on {{s1.topic}}"})),
        ]);
        let report = PlanValidator::new().validate(&plan);
        assert!(report.valid);
        let kinds: Vec<_> = report.warnings.iter().map(|w| w.error_type).collect();
        assert!(kinds.contains(&ValidationErrorType::MissingReason));
        assert!(kinds.contains(&ValidationErrorType::UndeclaredOutputFields));
        assert!(kinds.contains(&ValidationErrorType::EmbeddedPlaceholder));
    }

    #[test]
    fn test_validate_step_against_preceding() {
        let preceding = vec![search()];
        let good = fetch(json!({"urls": "{{s1.results}}"}));
        assert!(PlanValidator::new().validate_step(&good, &preceding).valid);

        let bad = fetch(json!({"urls": "{{s3.results}}"}));
        let report = PlanValidator::new().validate_step(&bad, &preceding);
        assert_eq!(error_types(&report), vec![ValidationErrorType::UnknownStepReference]);
    }

    #[test]
    fn test_feedback_and_error() {
        let plan = Plan::new(vec![search(), fetch(json!({"urls": "{{s1.output.results}}"}))]);
        let report = PlanValidator::new().validate(&plan);
        assert!(report.feedback().starts_with("- [s2] nested-field-path"));
        let err = report.into_result().unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.to_string().contains("1 error"));
    }
}
