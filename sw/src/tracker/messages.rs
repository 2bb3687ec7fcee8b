//! Tracker messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::ExecutionResult;

use super::task::{StepPhase, ToolCallRecord, TrackerSnapshot};

/// Errors from tracker operations
#[derive(Debug, Clone, Error)]
pub enum TrackerError {
    #[error("Channel error")]
    ChannelError,
}

/// Response from tracker operations
pub type TrackerResponse<T> = Result<T, TrackerError>;

/// Commands sent to the tracker actor
#[derive(Debug)]
pub enum TrackerCommand {
    /// Replace all tasks with one pending task per step
    RegisterPlan {
        steps: Vec<(String, String)>,
        reply: oneshot::Sender<TrackerResponse<()>>,
    },
    Phase {
        step_id: String,
        phase: StepPhase,
    },
    ToolCall {
        step_id: String,
        record: ToolCallRecord,
    },
    ApplyResult {
        result: Box<ExecutionResult>,
    },
    ReplaceStep {
        step_id: String,
        tool: String,
    },
    Snapshot {
        reply: oneshot::Sender<TrackerSnapshot>,
    },
    Shutdown,
}
