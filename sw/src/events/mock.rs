//! Recording sink for unit tests

use std::sync::Mutex;

use crate::domain::ExecutionResult;
use crate::recovery::{PendingFailure, RecoveryAction};
use crate::tracker::StepPhase;

use super::ProgressSink;

/// Records every callback and answers failures from a script
///
/// Decisions are consumed in order; once the script runs out the failure is
/// rejected.
#[derive(Default)]
pub struct RecordingSink {
    decisions: Mutex<Vec<RecoveryAction>>,
    pub phases: Mutex<Vec<(String, StepPhase)>>,
    pub results: Mutex<Vec<ExecutionResult>>,
    pub failures: Mutex<Vec<(String, String, Vec<RecoveryAction>)>>,
    pub tokens: Mutex<Vec<(String, String)>>,
    pub answer_progress: Mutex<Vec<String>>,
    /// Pending failures kept unresolved instead of answered
    pub parked: Mutex<Vec<PendingFailure>>,
    park: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deciding(actions: Vec<RecoveryAction>) -> Self {
        let mut actions = actions;
        actions.reverse();
        Self {
            decisions: Mutex::new(actions),
            ..Self::default()
        }
    }

    /// Keep every pending failure instead of answering it
    pub fn parking() -> Self {
        Self {
            park: true,
            ..Self::default()
        }
    }

    pub fn result_ids(&self) -> Vec<String> {
        self.results.lock().unwrap().iter().map(|r| r.step_id.clone()).collect()
    }

    pub fn failure_messages(&self) -> Vec<String> {
        self.failures.lock().unwrap().iter().map(|(_, m, _)| m.clone()).collect()
    }

    pub fn phases_of(&self, step_id: &str) -> Vec<StepPhase> {
        self.phases
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == step_id)
            .map(|(_, p)| *p)
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn on_phase_change(&self, step_id: &str, phase: StepPhase) {
        self.phases.lock().unwrap().push((step_id.to_string(), phase));
    }

    fn on_step_result(&self, _step_id: &str, result: &ExecutionResult) {
        self.results.lock().unwrap().push(result.clone());
    }

    fn on_failure_decision_needed(&self, pending: PendingFailure) {
        self.failures.lock().unwrap().push((
            pending.step_id().to_string(),
            pending.context().message().to_string(),
            pending.allowed_actions().to_vec(),
        ));
        if self.park {
            self.parked.lock().unwrap().push(pending);
            return;
        }
        match self.decisions.lock().unwrap().pop() {
            Some(action) => {
                if let Err(pending) = pending.resolve(action) {
                    pending.reject("scripted action not allowed");
                }
            }
            None => pending.reject("no scripted decision left"),
        }
    }

    fn on_content_token(&self, step_id: &str, token: &str) {
        self.tokens.lock().unwrap().push((step_id.to_string(), token.to_string()));
    }

    fn on_answer_progress(&self, content: &str) {
        self.answer_progress.lock().unwrap().push(content.to_string());
    }
}
