//! FailureRecoveryController - drives one step to a terminal result
//!
//! Each failure suspends the step on a [`PendingFailure`] until the sink
//! delivers a decision. Nothing is retried automatically.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::domain::{ExecutionResult, Plan, ResultLog, Step};
use crate::error::StepError;
use crate::executor::{AttemptContext, AttemptFailure, ResumePoint, StepExecutor};
use crate::planner::{Planner, RegenerateRequest};
use crate::tools::ToolDescriptor;
use crate::tracker::StepPhase;
use crate::validation::PlanValidator;

use super::pending::{Decision, FailureContext, PendingFailure, RecoveryAction};

/// Recovery lifecycle of one failing step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Detected,
    AwaitingDecision,
    Retrying,
    Regenerating,
    Skipped,
    Resolved,
}

impl RecoveryState {
    fn transition(self, step_id: &str, to: RecoveryState) -> RecoveryState {
        debug!(%step_id, from = ?self, ?to, "RecoveryState::transition");
        to
    }
}

/// How a step ended
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// Success or skip; the run continues
    Completed(ExecutionResult),
    /// The failure was rejected; the run halts after the current layer
    Halted { result: ExecutionResult, reason: String },
    /// The shared cancellation signal fired
    Aborted(ExecutionResult),
}

impl StepOutcome {
    pub fn result(&self) -> &ExecutionResult {
        match self {
            StepOutcome::Completed(result) | StepOutcome::Aborted(result) => result,
            StepOutcome::Halted { result, .. } => result,
        }
    }

    pub fn into_result(self) -> ExecutionResult {
        match self {
            StepOutcome::Completed(result) | StepOutcome::Aborted(result) => result,
            StepOutcome::Halted { result, .. } => result,
        }
    }
}

/// Result of running one step, plus its replacement definition if regenerated
#[derive(Debug, Clone)]
pub struct StepRun {
    pub outcome: StepOutcome,
    pub replaced_step: Option<Step>,
}

enum Decided {
    Action(RecoveryAction),
    Rejected(String),
    Cancelled,
}

enum NextAttempt {
    Fresh,
    Resume(ResumePoint),
}

pub struct FailureRecoveryController {
    executor: Arc<StepExecutor>,
    planner: Option<Arc<dyn Planner>>,
    validator: PlanValidator,
    config: RecoveryConfig,
    tools: Vec<ToolDescriptor>,
}

impl FailureRecoveryController {
    pub fn new(executor: Arc<StepExecutor>, config: RecoveryConfig, tools: Vec<ToolDescriptor>) -> Self {
        let validator = PlanValidator::new().with_known_tools(tools.iter().map(|t| t.name.clone()));
        Self {
            executor,
            planner: None,
            validator,
            config,
            tools,
        }
    }

    /// Enables the regenerate action
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn allowed_actions(&self) -> Vec<RecoveryAction> {
        let mut allowed = vec![RecoveryAction::Retry];
        if self.planner.is_some() {
            allowed.push(RecoveryAction::Regenerate);
        }
        allowed.push(RecoveryAction::Skip);
        allowed
    }

    /// Run `step` until it succeeds, is skipped, halts or aborts
    ///
    /// The terminal result is reported to the tracker and sink before returning.
    pub async fn run_step(
        &self,
        step: &Step,
        plan: &Plan,
        results: &ResultLog,
        goal: &str,
        cancel: &CancellationToken,
    ) -> StepRun {
        debug!(step_id = %step.step_id, "FailureRecoveryController::run_step: called");
        let reporter = self.executor.reporter();
        let mut step = step.clone();
        let mut replaced_step = None;
        let mut next = NextAttempt::Fresh;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let attempt = self.attempt(&step, next, results, goal, cancel).await;
            let mut failure = match attempt {
                Ok(result) => {
                    let result = result.with_attempts(attempts);
                    info!(step_id = %step.step_id, attempts, "Step succeeded");
                    reporter.result(&result).await;
                    return StepRun {
                        outcome: StepOutcome::Completed(result),
                        replaced_step,
                    };
                }
                Err(failure) => failure,
            };

            if !failure.error.is_recoverable() {
                let result = self.failed_result(&step, &failure, attempts);
                reporter.result(&result).await;
                return StepRun {
                    outcome: StepOutcome::Aborted(result),
                    replaced_step,
                };
            }

            let mut state = RecoveryState::Detected;
            info!(step_id = %step.step_id, error = %failure.error, "Step failed; awaiting decision");
            next = loop {
                state = state.transition(&step.step_id, RecoveryState::AwaitingDecision);
                match self.await_decision(&step, &failure, attempts, cancel).await {
                    Decided::Action(RecoveryAction::Retry) => {
                        state = state.transition(&step.step_id, RecoveryState::Retrying);
                        reporter.phase(&step.step_id, StepPhase::Retrying).await;
                        break match failure.resume.take() {
                            Some(point) => NextAttempt::Resume(point),
                            None => NextAttempt::Fresh,
                        };
                    }
                    Decided::Action(RecoveryAction::Skip) => {
                        state = state.transition(&step.step_id, RecoveryState::Skipped);
                        let fallback = if self.config.skip_fallback {
                            results.last_success_output().cloned()
                        } else {
                            None
                        };
                        info!(step_id = %step.step_id, has_fallback = fallback.is_some(), "Skipping step");
                        let result = ExecutionResult::skipped(
                            &step.step_id,
                            &step.tool,
                            failure.recorded_input(),
                            &failure.error,
                            fallback,
                        )
                        .with_attempts(attempts);
                        reporter.result(&result).await;
                        state.transition(&step.step_id, RecoveryState::Resolved);
                        return StepRun {
                            outcome: StepOutcome::Completed(result),
                            replaced_step,
                        };
                    }
                    Decided::Action(RecoveryAction::Regenerate) => {
                        state = state.transition(&step.step_id, RecoveryState::Regenerating);
                        reporter.phase(&step.step_id, StepPhase::Regenerating).await;
                        match self.regenerate(&step, plan, results, &failure, goal).await {
                            Ok(new_step) => {
                                reporter.replace_step(&new_step.step_id, &new_step.tool).await;
                                step = new_step;
                                replaced_step = Some(step.clone());
                                break NextAttempt::Fresh;
                            }
                            Err(error) => {
                                warn!(step_id = %step.step_id, %error, "Regeneration failed");
                                failure = AttemptFailure {
                                    error,
                                    resume: failure.resume.take(),
                                };
                            }
                        }
                    }
                    Decided::Rejected(reason) => {
                        info!(step_id = %step.step_id, %reason, "Failure rejected; halting run");
                        let result = self.failed_result(&step, &failure, attempts);
                        reporter.result(&result).await;
                        return StepRun {
                            outcome: StepOutcome::Halted { result, reason },
                            replaced_step,
                        };
                    }
                    Decided::Cancelled => {
                        info!(step_id = %step.step_id, "Cancelled while awaiting decision");
                        let result = self.failed_result(&step, &failure, attempts);
                        reporter.result(&result).await;
                        return StepRun {
                            outcome: StepOutcome::Aborted(result),
                            replaced_step,
                        };
                    }
                }
            };
            state.transition(&step.step_id, RecoveryState::Resolved);
        }
    }

    async fn attempt(
        &self,
        step: &Step,
        next: NextAttempt,
        results: &ResultLog,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, AttemptFailure> {
        let depends_on = dependencies_of(step);
        let ctx = AttemptContext {
            goal,
            cancel,
            depends_on: &depends_on,
        };
        match next {
            NextAttempt::Resume(point) => self.executor.execute_resolved(step, point, results, &ctx).await,
            NextAttempt::Fresh => {
                if let Some(error) = unmet_dependency(step, &depends_on, results) {
                    info!(step_id = %step.step_id, %error, "Dependency not satisfied");
                    return Err(AttemptFailure { error, resume: None });
                }
                self.executor.execute(step, results, &ctx).await
            }
        }
    }

    async fn await_decision(
        &self,
        step: &Step,
        failure: &AttemptFailure,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> Decided {
        let reporter = self.executor.reporter();
        let context = FailureContext {
            step_id: step.step_id.clone(),
            tool: step.tool.clone(),
            failure: (&failure.error).into(),
            attempts,
        };
        let (pending, rx) = PendingFailure::new(context, self.allowed_actions());
        reporter.phase(&step.step_id, StepPhase::AwaitingDecision).await;
        reporter.decision_needed(pending);

        let decision = match self.config.decision_timeout() {
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Decided::Cancelled,
                decision = rx => decision,
            },
            Some(limit) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Decided::Cancelled,
                waited = tokio::time::timeout(limit, rx) => match waited {
                    Ok(decision) => decision,
                    Err(_) => {
                        // configs built without validation still never re-run unattended
                        let action = match self.config.timeout_action {
                            RecoveryAction::Skip => RecoveryAction::Skip,
                            other => {
                                warn!(step_id = %step.step_id, %other, "Timeout action is not skip; skipping instead");
                                RecoveryAction::Skip
                            }
                        };
                        warn!(step_id = %step.step_id, %action, ?limit, "No decision in time; applying timeout action");
                        return Decided::Action(action);
                    }
                },
            },
        };

        match decision {
            Ok(Decision::Action(action)) => {
                info!(step_id = %step.step_id, %action, "Recovery decision received");
                Decided::Action(action)
            }
            Ok(Decision::Rejected(reason)) => Decided::Rejected(reason),
            Err(_) => Decided::Rejected("decision dropped without an answer".to_string()),
        }
    }

    async fn regenerate(
        &self,
        step: &Step,
        plan: &Plan,
        results: &ResultLog,
        failure: &AttemptFailure,
        goal: &str,
    ) -> Result<Step, StepError> {
        let regeneration_error = |message: String| StepError::Regeneration {
            step_id: step.step_id.clone(),
            message,
        };
        let Some(planner) = &self.planner else {
            return Err(regeneration_error("no planner configured".to_string()));
        };

        let request = RegenerateRequest {
            goal: goal.to_string(),
            plan: plan.clone(),
            step: step.clone(),
            failure: (&failure.error).into(),
            tools: self.tools.clone(),
        };
        let mut new_step = planner
            .regenerate_step(request)
            .await
            .map_err(|e| regeneration_error(e.to_string()))?;
        if new_step.step_id != step.step_id {
            debug!(returned = %new_step.step_id, expected = %step.step_id, "Forcing original step id");
            new_step.step_id = step.step_id.clone();
        }

        // only steps with a recorded result can be referenced; in DAG mode
        // that excludes same-layer siblings and steps in later layers
        let available: Vec<Step> = plan
            .preceding(&step.step_id)
            .iter()
            .filter(|s| results.contains(&s.step_id))
            .cloned()
            .collect();
        let report = self.validator.validate_step(&new_step, &available);
        if !report.valid {
            return Err(StepError::InvalidReplacement {
                step_id: step.step_id.clone(),
                issues: report.errors,
            });
        }
        info!(step_id = %new_step.step_id, tool = %new_step.tool, "Replacement step accepted");
        Ok(new_step)
    }

    fn failed_result(&self, step: &Step, failure: &AttemptFailure, attempts: u32) -> ExecutionResult {
        ExecutionResult::failure(&step.step_id, &step.tool, failure.recorded_input(), &failure.error)
            .with_attempts(attempts)
    }
}

/// Distinct source steps referenced by the step's input, in first-use order
pub fn dependencies_of(step: &Step) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    for reference in step.references() {
        if reference.source_step_id != step.step_id && !deps.contains(&reference.source_step_id) {
            deps.push(reference.source_step_id);
        }
    }
    deps
}

fn unmet_dependency(step: &Step, depends_on: &[String], results: &ResultLog) -> Option<StepError> {
    depends_on.iter().find_map(|dep| {
        let reason = match results.get(dep) {
            None => "has no recorded result",
            Some(r) if r.satisfies_dependents() => return None,
            Some(r) if r.skipped => "was skipped without a fallback",
            Some(_) => "failed",
        };
        Some(StepError::MissingDependency {
            step_id: step.step_id.clone(),
            dependency: dep.clone(),
            reason: reason.to_string(),
        })
    })
}
