//! ProgressSink - narrow callback surface for presentation layers

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::ExecutionResult;
use crate::recovery::{PendingFailure, RecoveryAction};
use crate::tracker::StepPhase;

use super::bus::EventBus;
use super::types::RunEvent;

/// Receives progress callbacks from a run
///
/// Callbacks are synchronous and must not block. A sink that needs to wait
/// for an operator keeps the [`PendingFailure`] and resolves it later.
pub trait ProgressSink: Send + Sync {
    fn on_phase_change(&self, step_id: &str, phase: StepPhase);

    fn on_step_result(&self, step_id: &str, result: &ExecutionResult);

    /// A step failed; the run branch stays suspended until `pending` is resolved
    fn on_failure_decision_needed(&self, pending: PendingFailure);

    fn on_content_token(&self, _step_id: &str, _token: &str) {}

    fn on_answer_progress(&self, _content: &str) {}
}

/// Answers every failure with the same decision
#[derive(Debug, Clone)]
pub struct FixedDecisionSink {
    action: Option<RecoveryAction>,
}

impl FixedDecisionSink {
    pub fn always(action: RecoveryAction) -> Self {
        Self { action: Some(action) }
    }

    /// Reject every failure, halting the run
    pub fn reject() -> Self {
        Self { action: None }
    }
}

impl ProgressSink for FixedDecisionSink {
    fn on_phase_change(&self, step_id: &str, phase: StepPhase) {
        debug!(%step_id, %phase, "FixedDecisionSink::on_phase_change");
    }

    fn on_step_result(&self, step_id: &str, result: &ExecutionResult) {
        debug!(%step_id, success = result.success, "FixedDecisionSink::on_step_result");
    }

    fn on_failure_decision_needed(&self, pending: PendingFailure) {
        let step_id = pending.step_id().to_string();
        match self.action {
            Some(action) => {
                info!(%step_id, %action, "Applying fixed recovery decision");
                if let Err(pending) = pending.resolve(action) {
                    warn!(%step_id, %action, "Fixed decision not allowed; rejecting");
                    pending.reject(format!("{} is not allowed for step {}", action, step_id));
                }
            }
            None => pending.reject("failures are rejected"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    #[error("No pending failure for step {0}")]
    NoPending(String),

    #[error("Action {action} is not allowed for step {step_id}")]
    NotAllowed { step_id: String, action: RecoveryAction },

    #[error("Step {0} is no longer waiting for a decision")]
    Closed(String),
}

/// Pending failures parked by step id until an operator decides
///
/// Concurrent failures in DAG mode each get their own entry.
#[derive(Debug, Clone, Default)]
pub struct DecisionBoard {
    pending: Arc<Mutex<HashMap<String, PendingFailure>>>,
}

impl DecisionBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingFailure>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn park(&self, pending: PendingFailure) {
        debug!(step_id = %pending.step_id(), "DecisionBoard::park: called");
        self.lock().insert(pending.step_id().to_string(), pending);
    }

    /// Lock and drop entries whose step already stopped waiting
    fn live(&self) -> MutexGuard<'_, HashMap<String, PendingFailure>> {
        let mut pending = self.lock();
        pending.retain(|step_id, p| {
            let open = !p.is_closed();
            if !open {
                debug!(%step_id, "DecisionBoard::live: dropping closed entry");
            }
            open
        });
        pending
    }

    fn take(&self, step_id: &str) -> Result<PendingFailure, DecisionError> {
        let pending = self
            .lock()
            .remove(step_id)
            .ok_or_else(|| DecisionError::NoPending(step_id.to_string()))?;
        if pending.is_closed() {
            warn!(%step_id, "Decision arrived after the step stopped waiting");
            return Err(DecisionError::Closed(step_id.to_string()));
        }
        Ok(pending)
    }

    /// Step ids awaiting a decision, sorted
    pub fn pending_steps(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn allowed_actions(&self, step_id: &str) -> Option<Vec<RecoveryAction>> {
        self.live().get(step_id).map(|p| p.allowed_actions().to_vec())
    }

    pub fn decide(&self, step_id: &str, action: RecoveryAction) -> Result<(), DecisionError> {
        debug!(%step_id, %action, "DecisionBoard::decide: called");
        let pending = self.take(step_id)?;
        pending.resolve(action).map_err(|pending| {
            self.park(pending);
            DecisionError::NotAllowed {
                step_id: step_id.to_string(),
                action,
            }
        })
    }

    pub fn reject(&self, step_id: &str, reason: impl Into<String>) -> Result<(), DecisionError> {
        debug!(%step_id, "DecisionBoard::reject: called");
        let pending = self.take(step_id)?;
        pending.reject(reason);
        Ok(())
    }
}

/// Sink that publishes [`RunEvent`]s and parks failures on a [`DecisionBoard`]
#[derive(Debug, Clone, Default)]
pub struct EventBusSink {
    bus: EventBus,
    board: DecisionBoard,
}

impl EventBusSink {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            board: DecisionBoard::new(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn board(&self) -> &DecisionBoard {
        &self.board
    }
}

impl ProgressSink for EventBusSink {
    fn on_phase_change(&self, step_id: &str, phase: StepPhase) {
        self.bus.emit(RunEvent::PhaseChanged {
            step_id: step_id.to_string(),
            phase,
        });
    }

    fn on_step_result(&self, step_id: &str, result: &ExecutionResult) {
        self.bus.emit(RunEvent::StepCompleted {
            step_id: step_id.to_string(),
            success: result.success,
            skipped: result.skipped,
            error: result.error.as_ref().map(|e| e.message.clone()),
        });
    }

    fn on_failure_decision_needed(&self, pending: PendingFailure) {
        let context = pending.context();
        let event = RunEvent::DecisionNeeded {
            step_id: context.step_id.clone(),
            message: context.message().to_string(),
            placeholder: context.placeholder().map(str::to_string),
            available_fields: context.available_fields().to_vec(),
            allowed_actions: pending.allowed_actions().to_vec(),
        };
        // park before announcing so a subscriber can decide immediately
        self.board.park(pending);
        self.bus.emit(event);
    }

    fn on_content_token(&self, step_id: &str, token: &str) {
        self.bus.emit(RunEvent::ContentToken {
            step_id: step_id.to_string(),
            token: token.to_string(),
        });
    }

    fn on_answer_progress(&self, content: &str) {
        self.bus.emit(RunEvent::AnswerProgress {
            content: content.to_string(),
        });
    }
}
