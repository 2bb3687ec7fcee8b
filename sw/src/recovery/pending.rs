//! PendingFailure - a suspended decision point for one failed step

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::StepFailure;

/// Operator choice for a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryAction {
    /// Re-run the step with the same resolved input
    Retry,
    /// Ask the planner for a replacement step with the same id
    Regenerate,
    /// Record the step as skipped and continue
    Skip,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::Retry => write!(f, "retry"),
            RecoveryAction::Regenerate => write!(f, "regenerate"),
            RecoveryAction::Skip => write!(f, "skip"),
        }
    }
}

impl FromStr for RecoveryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "retry" => Ok(RecoveryAction::Retry),
            "regenerate" => Ok(RecoveryAction::Regenerate),
            "skip" => Ok(RecoveryAction::Skip),
            other => Err(format!("unknown recovery action '{}'", other)),
        }
    }
}

/// The answer delivered through a [`PendingFailure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Action(RecoveryAction),
    Rejected(String),
}

/// What the operator sees about a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    pub step_id: String,
    pub tool: String,
    pub failure: StepFailure,
    /// Attempts made so far, including the failed one
    pub attempts: u32,
}

impl FailureContext {
    pub fn message(&self) -> &str {
        &self.failure.message
    }

    pub fn placeholder(&self) -> Option<&str> {
        self.failure.placeholder.as_deref()
    }

    pub fn available_fields(&self) -> &[String] {
        &self.failure.available_fields
    }
}

/// A failed step waiting for exactly one decision
///
/// Consumed by [`resolve`](Self::resolve) or [`reject`](Self::reject).
/// Dropping it unresolved counts as a rejection.
#[derive(Debug)]
pub struct PendingFailure {
    context: FailureContext,
    allowed: Vec<RecoveryAction>,
    reply: oneshot::Sender<Decision>,
}

impl PendingFailure {
    pub(crate) fn new(context: FailureContext, allowed: Vec<RecoveryAction>) -> (Self, oneshot::Receiver<Decision>) {
        debug!(step_id = %context.step_id, ?allowed, "PendingFailure::new: called");
        let (reply, rx) = oneshot::channel();
        (
            Self {
                context,
                allowed,
                reply,
            },
            rx,
        )
    }

    pub fn step_id(&self) -> &str {
        &self.context.step_id
    }

    pub fn context(&self) -> &FailureContext {
        &self.context
    }

    pub fn allowed_actions(&self) -> &[RecoveryAction] {
        &self.allowed
    }

    pub fn allows(&self, action: RecoveryAction) -> bool {
        self.allowed.contains(&action)
    }

    /// True once the step stopped waiting (timeout or cancellation)
    pub fn is_closed(&self) -> bool {
        self.reply.is_closed()
    }

    /// Deliver a decision; hands the failure back when the action is not offered
    pub fn resolve(self, action: RecoveryAction) -> Result<(), Self> {
        debug!(step_id = %self.context.step_id, %action, "PendingFailure::resolve: called");
        if !self.allows(action) {
            debug!("PendingFailure::resolve: action not allowed");
            return Err(self);
        }
        // the run may already be gone; nothing left to tell
        let _ = self.reply.send(Decision::Action(action));
        Ok(())
    }

    /// Refuse every action; halts the run
    pub fn reject(self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(step_id = %self.context.step_id, %reason, "PendingFailure::reject: called");
        let _ = self.reply.send(Decision::Rejected(reason));
    }
}
