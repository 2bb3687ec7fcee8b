//! Task - the tracker's projection of a step

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ExecutionResult;

/// Coarse status shown to progress consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Aborted,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped | Self::Aborted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Fine-grained step lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepPhase {
    #[default]
    Scheduled,
    ResolvingInput,
    GeneratingContent,
    InvokingTool,
    AwaitingDecision,
    Retrying,
    Regenerating,
    Completed,
    Failed,
    Skipped,
    Aborted,
}

impl StepPhase {
    /// Status implied by entering this phase
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Scheduled => TaskStatus::Pending,
            Self::ResolvingInput | Self::GeneratingContent | Self::InvokingTool | Self::Retrying | Self::Regenerating => {
                TaskStatus::Running
            }
            Self::AwaitingDecision | Self::Failed => TaskStatus::Failed,
            Self::Completed => TaskStatus::Success,
            Self::Skipped => TaskStatus::Skipped,
            Self::Aborted => TaskStatus::Aborted,
        }
    }
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::ResolvingInput => "resolving-input",
            Self::GeneratingContent => "generating-content",
            Self::InvokingTool => "invoking-tool",
            Self::AwaitingDecision => "awaiting-decision",
            Self::Retrying => "retrying",
            Self::Regenerating => "regenerating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// One tool (or generation) call made on behalf of a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub input: Value,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

/// Live mirror of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub tool: String,
    pub status: TaskStatus,
    pub phase: StepPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            status: TaskStatus::Pending,
            phase: StepPhase::Scheduled,
            error: None,
            tool_calls: Vec::new(),
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn enter_phase(&mut self, phase: StepPhase) {
        self.phase = phase;
        self.status = phase.status();
        self.updated_at = Utc::now();
    }

    /// Project a recorded result onto the task
    pub(crate) fn apply_result(&mut self, result: &ExecutionResult) {
        let phase = if result.success {
            StepPhase::Completed
        } else if result.skipped {
            StepPhase::Skipped
        } else if result.is_aborted() {
            StepPhase::Aborted
        } else {
            StepPhase::Failed
        };
        self.enter_phase(phase);
        self.tool = result.tool_name.clone();
        self.error = result.error.as_ref().map(|e| e.message.clone());
        self.attempts = result.attempts;
    }
}

/// Read-only copy of all tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub tasks: Vec<Task>,
}

impl TrackerSnapshot {
    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.task(id).map(|t| t.status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}
