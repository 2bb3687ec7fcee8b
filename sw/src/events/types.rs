//! Event types for run observability

use serde::{Deserialize, Serialize};

use crate::recovery::RecoveryAction;
use crate::tracker::StepPhase;

/// Everything observable about a run, in emission order
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    /// A step entered a new phase
    PhaseChanged { step_id: String, phase: StepPhase },
    /// A step produced its result
    StepCompleted {
        step_id: String,
        success: bool,
        skipped: bool,
        error: Option<String>,
    },
    /// A failed step is parked on the decision board
    DecisionNeeded {
        step_id: String,
        message: String,
        placeholder: Option<String>,
        available_fields: Vec<String>,
        allowed_actions: Vec<RecoveryAction>,
    },
    /// A token of generated step content
    ContentToken { step_id: String, token: String },
    /// Currently available final answer text
    AnswerProgress { content: String },
}

impl RunEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            RunEvent::PhaseChanged { .. } => "PhaseChanged",
            RunEvent::StepCompleted { .. } => "StepCompleted",
            RunEvent::DecisionNeeded { .. } => "DecisionNeeded",
            RunEvent::ContentToken { .. } => "ContentToken",
            RunEvent::AnswerProgress { .. } => "AnswerProgress",
        }
    }

    pub fn step_id(&self) -> Option<&str> {
        match self {
            RunEvent::PhaseChanged { step_id, .. }
            | RunEvent::StepCompleted { step_id, .. }
            | RunEvent::DecisionNeeded { step_id, .. }
            | RunEvent::ContentToken { step_id, .. } => Some(step_id),
            RunEvent::AnswerProgress { .. } => None,
        }
    }
}
