//! Reporter - fans step transitions out to the tracker and the sink

use std::sync::Arc;

use tracing::warn;

use crate::domain::ExecutionResult;
use crate::recovery::PendingFailure;
use crate::tracker::{ExecutionTracker, StepPhase, ToolCallRecord};

use super::ProgressSink;

/// Keeps the tracker and the progress sink in step
///
/// Tracker failures are logged and never fail the step being reported.
#[derive(Clone)]
pub struct Reporter {
    tracker: ExecutionTracker,
    sink: Arc<dyn ProgressSink>,
}

impl Reporter {
    pub fn new(tracker: ExecutionTracker, sink: Arc<dyn ProgressSink>) -> Self {
        Self { tracker, sink }
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    pub async fn phase(&self, step_id: &str, phase: StepPhase) {
        if let Err(e) = self.tracker.phase(step_id, phase).await {
            warn!(%step_id, error = %e, "Failed to record phase on tracker");
        }
        self.sink.on_phase_change(step_id, phase);
    }

    pub async fn tool_call(&self, step_id: &str, record: ToolCallRecord) {
        if let Err(e) = self.tracker.tool_call(step_id, record).await {
            warn!(%step_id, error = %e, "Failed to record tool call on tracker");
        }
    }

    pub async fn result(&self, result: &ExecutionResult) {
        if let Err(e) = self.tracker.apply_result(result).await {
            warn!(step_id = %result.step_id, error = %e, "Failed to record result on tracker");
        }
        self.sink.on_step_result(&result.step_id, result);
    }

    pub async fn replace_step(&self, step_id: &str, tool: &str) {
        if let Err(e) = self.tracker.replace_step(step_id, tool).await {
            warn!(%step_id, error = %e, "Failed to record step replacement on tracker");
        }
        self.sink.on_phase_change(step_id, StepPhase::Regenerating);
    }

    pub fn decision_needed(&self, pending: PendingFailure) {
        self.sink.on_failure_decision_needed(pending);
    }

    pub fn content_token(&self, step_id: &str, token: &str) {
        self.sink.on_content_token(step_id, token);
    }

    pub fn answer_progress(&self, content: &str) {
        self.sink.on_answer_progress(content);
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").field("tracker", &self.tracker).finish()
    }
}
