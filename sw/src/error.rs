//! Step-scoped error taxonomy
//!
//! Every error a single step can produce. None of these crash a run: they are
//! funneled through the failure recovery controller, except `Aborted` which
//! stops execution.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::placeholder::PlaceholderReplacementError;
use crate::validation::ValidationIssue;

/// Errors from executing one step
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error(transparent)]
    Placeholder(#[from] PlaceholderReplacementError),

    #[error("Step {step_id} depends on {dependency}, which {reason}")]
    MissingDependency {
        step_id: String,
        dependency: String,
        reason: String,
    },

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool '{tool}' did not complete within {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    #[error("Content generation for step {step_id} failed: {message}")]
    Generation { step_id: String, message: String },

    #[error("Regenerating step {step_id} failed: {message}")]
    Regeneration { step_id: String, message: String },

    #[error("Regenerated step {step_id} is invalid: {}", summarize_issues(.issues))]
    InvalidReplacement {
        step_id: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("Step {step_id} aborted")]
    Aborted { step_id: String },
}

fn summarize_issues(issues: &[ValidationIssue]) -> String {
    issues.iter().map(|i| i.message.as_str()).collect::<Vec<_>>().join("; ")
}

/// Coarse classification of a [`StepError`], stable for serialization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepErrorKind {
    Placeholder,
    MissingDependency,
    ToolExecution,
    ToolTimeout,
    Generation,
    Regeneration,
    InvalidReplacement,
    Aborted,
}

impl StepError {
    pub fn kind(&self) -> StepErrorKind {
        match self {
            StepError::Placeholder(_) => StepErrorKind::Placeholder,
            StepError::MissingDependency { .. } => StepErrorKind::MissingDependency,
            StepError::ToolExecution { .. } => StepErrorKind::ToolExecution,
            StepError::ToolTimeout { .. } => StepErrorKind::ToolTimeout,
            StepError::Generation { .. } => StepErrorKind::Generation,
            StepError::Regeneration { .. } => StepErrorKind::Regeneration,
            StepError::InvalidReplacement { .. } => StepErrorKind::InvalidReplacement,
            StepError::Aborted { .. } => StepErrorKind::Aborted,
        }
    }

    /// Whether the recovery controller may offer a decision for this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, StepError::Aborted { .. })
    }

    /// The offending placeholder, for placeholder errors
    pub fn placeholder(&self) -> Option<&str> {
        match self {
            StepError::Placeholder(e) => Some(&e.placeholder),
            _ => None,
        }
    }

    /// Fields available on the referenced step, for placeholder errors
    pub fn available_fields(&self) -> &[String] {
        match self {
            StepError::Placeholder(e) => &e.available_fields,
            _ => &[],
        }
    }
}

/// Serializable record of a step failure, stored on execution results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: StepErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_fields: Vec<String>,
}

impl From<&StepError> for StepFailure {
    fn from(err: &StepError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            placeholder: err.placeholder().map(str::to_string),
            available_fields: err.available_fields().to_vec(),
        }
    }
}
