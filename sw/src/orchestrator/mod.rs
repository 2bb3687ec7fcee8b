//! Orchestrator - runs a goal from plan to final answer
//!
//! Owns the result log for a run. Validates the plan, builds the dependency
//! graph, then drives every step through the recovery controller either in
//! declaration order or layer by layer. In DAG mode each layer runs as a
//! `JoinSet` bounded by a semaphore, and every task reads the same snapshot
//! of the log taken when the layer started.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{DuplicateResult, ExecutionResult, Plan, ResultLog};
use crate::events::{ProgressSink, Reporter};
use crate::executor::StepExecutor;
use crate::graph::{DependencyGraph, ExecutionOrder, GraphError};
use crate::llm::TextGenerator;
use crate::planner::{PlanRequest, Planner, PlanningError};
use crate::prompts::PromptRenderer;
use crate::recovery::{FailureRecoveryController, StepOutcome, StepRun};
use crate::synthesis::{FinalAnswer, FinalAnswerSynthesizer, SynthesisError};
use crate::tools::{ToolDescriptor, ToolRegistry};
use crate::tracker::{ExecutionTracker, TrackerError, TrackerSnapshot};
use crate::validation::{PlanValidationError, PlanValidator};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Every step succeeded or was skipped
    Completed,
    /// A failure was rejected
    Halted { step_id: String, reason: String },
    /// The cancellation signal fired
    Aborted,
    /// Steps finished but no answer could be extracted
    SynthesisFailed { reason: String },
}

impl RunStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Halted { step_id, reason } => write!(f, "halted at {}: {}", step_id, reason),
            RunStatus::Aborted => write!(f, "aborted"),
            RunStatus::SynthesisFailed { reason } => write!(f, "synthesis failed: {}", reason),
        }
    }
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub answer: Option<FinalAnswer>,
    /// Results in append order
    pub results: Vec<ExecutionResult>,
    pub tasks: TrackerSnapshot,
    /// The executed plan, including regenerated steps
    pub plan: Plan,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    PlanValidation(#[from] PlanValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    #[error("No planner configured")]
    NoPlanner,

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    DuplicateResult(#[from] DuplicateResult),

    #[error("Run aborted before execution")]
    Aborted,
}

/// Per-run mutable state
struct RunState {
    plan: Plan,
    results: ResultLog,
    status: RunStatus,
}

impl RunState {
    /// Fold one step's run into the log; the first halt or abort wins
    fn absorb(&mut self, run: StepRun) -> Result<(), OrchestratorError> {
        if let Some(step) = run.replaced_step
            && !self.plan.replace_step(step)
        {
            warn!("Replacement step has no slot in the plan");
        }
        let step_id = run.outcome.result().step_id.clone();
        match run.outcome {
            StepOutcome::Completed(result) => self.results.append(result)?,
            StepOutcome::Halted { result, reason } => {
                self.results.append(result)?;
                if self.status.is_completed() {
                    self.status = RunStatus::Halted { step_id, reason };
                }
            }
            StepOutcome::Aborted(result) => {
                self.results.append(result)?;
                self.status = RunStatus::Aborted;
            }
        }
        Ok(())
    }
}

pub struct Orchestrator {
    config: Config,
    registry: Arc<dyn ToolRegistry>,
    sink: Arc<dyn ProgressSink>,
    generator: Option<Arc<dyn TextGenerator>>,
    planner: Option<Arc<dyn Planner>>,
    renderer: Arc<PromptRenderer>,
}

impl Orchestrator {
    pub fn new(config: Config, registry: Arc<dyn ToolRegistry>, sink: Arc<dyn ProgressSink>) -> Self {
        debug!(mode = %config.engine.mode, "Orchestrator::new: called");
        let renderer = Arc::new(PromptRenderer::new(config.prompts.dir.as_deref()));
        Self {
            config,
            registry,
            sink,
            generator: None,
            planner: None,
            renderer,
        }
    }

    /// Enables content generation and answer synthesis
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Enables planning from a goal and the regenerate action
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_renderer(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Plan, validate and execute a goal
    ///
    /// Rejected plans are sent back to the planner with the validation errors
    /// as feedback, up to `engine.max-plan-attempts` times.
    pub async fn run_goal(&self, goal: &str, cancel: &CancellationToken) -> Result<RunOutcome, OrchestratorError> {
        debug!(%goal, "Orchestrator::run_goal: called");
        let planner = self.planner.as_ref().ok_or(OrchestratorError::NoPlanner)?;
        let tools = self.registry.list_tools().await;
        let validator = validator_for(&tools);

        let mut feedback: Option<String> = None;
        let mut last_error = None;
        for attempt in 1..=self.config.engine.max_plan_attempts {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Aborted);
            }
            let mut request = PlanRequest::new(goal, tools.clone());
            if let Some(feedback) = &feedback {
                request = request.with_feedback(feedback.clone());
            }
            let plan = planner.plan(request).await?;
            let report = validator.validate(&plan);
            if report.valid {
                info!(attempt, steps = plan.len(), "Plan accepted");
                return self.execute_plan(goal, plan, cancel).await;
            }
            warn!(attempt, errors = report.errors.len(), "Plan rejected by validator");
            feedback = Some(report.feedback());
            last_error = report.into_result().err();
        }

        Err(last_error
            .unwrap_or_else(|| PlanValidationError { issues: Vec::new() })
            .into())
    }

    /// Execute an already obtained plan
    pub async fn execute_plan(
        &self,
        goal: &str,
        plan: Plan,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        let run_id = Uuid::now_v7();
        info!(%run_id, steps = plan.len(), mode = %self.config.engine.mode, "Starting run");
        let tools = self.registry.list_tools().await;
        let warnings = validator_for(&tools).validate(&plan).into_result()?;
        for warning in &warnings {
            debug!(%warning, "Plan warning");
        }
        let graph = DependencyGraph::build(&plan)?;
        let order = graph.execution_order(self.config.engine.mode);

        let tracker = ExecutionTracker::spawn();
        tracker
            .register_plan(plan.steps.iter().map(|s| (s.step_id.clone(), s.tool.clone())).collect())
            .await?;
        let reporter = Reporter::new(tracker.clone(), self.sink.clone());
        let controller = Arc::new(self.controller(tools, reporter.clone()));

        let mut state = RunState {
            plan,
            results: ResultLog::new(),
            status: RunStatus::Completed,
        };
        match order {
            ExecutionOrder::Sequential(ids) => self.run_sequential(&controller, &ids, &mut state, goal, cancel).await?,
            ExecutionOrder::Layered(layers) => self.run_layered(&controller, layers, &mut state, goal, cancel).await?,
        }

        let mut answer = None;
        if state.status.is_completed()
            && let Some(generator) = &self.generator
        {
            let synthesizer =
                FinalAnswerSynthesizer::new(generator.clone(), self.renderer.clone(), self.config.synthesis.clone());
            match synthesizer
                .synthesize(goal, &state.results, |content| reporter.answer_progress(content), cancel)
                .await
            {
                Ok(final_answer) => answer = Some(final_answer),
                Err(SynthesisError::Aborted) => state.status = RunStatus::Aborted,
                Err(e) => {
                    state.status = RunStatus::SynthesisFailed { reason: e.to_string() };
                }
            }
        }

        let tasks = tracker.snapshot().await?;
        if let Err(e) = tracker.shutdown().await {
            debug!(error = %e, "Tracker already stopped");
        }
        info!(%run_id, status = %state.status, results = state.results.len(), "Run finished");
        Ok(RunOutcome {
            run_id,
            status: state.status,
            answer,
            results: state.results.into_vec(),
            tasks,
            plan: state.plan,
        })
    }

    fn controller(&self, tools: Vec<ToolDescriptor>, reporter: Reporter) -> FailureRecoveryController {
        let mut executor = StepExecutor::new(
            self.registry.clone(),
            tools.clone(),
            self.config.engine.clone(),
            reporter,
        )
        .with_renderer(self.renderer.clone());
        if let Some(generator) = &self.generator {
            executor = executor.with_generator(generator.clone());
        }
        let controller = FailureRecoveryController::new(Arc::new(executor), self.config.recovery.clone(), tools);
        match &self.planner {
            Some(planner) => controller.with_planner(planner.clone()),
            None => controller,
        }
    }

    async fn run_sequential(
        &self,
        controller: &FailureRecoveryController,
        ids: &[String],
        state: &mut RunState,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        debug!(steps = ids.len(), "Orchestrator::run_sequential: called");
        for step_id in ids {
            if cancel.is_cancelled() {
                state.status = RunStatus::Aborted;
                break;
            }
            let Some(step) = state.plan.step(step_id).cloned() else {
                continue;
            };
            let run = controller.run_step(&step, &state.plan, &state.results, goal, cancel).await;
            state.absorb(run)?;
            if !state.status.is_completed() {
                break;
            }
        }
        Ok(())
    }

    async fn run_layered(
        &self,
        controller: &Arc<FailureRecoveryController>,
        layers: Vec<Vec<String>>,
        state: &mut RunState,
        goal: &str,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        debug!(layers = layers.len(), "Orchestrator::run_layered: called");
        let semaphore = Arc::new(Semaphore::new(self.config.engine.max_concurrent_steps));
        let goal: Arc<str> = Arc::from(goal);

        for (index, layer) in layers.into_iter().enumerate() {
            if cancel.is_cancelled() {
                state.status = RunStatus::Aborted;
                break;
            }
            info!(layer = index, steps = layer.len(), "Starting layer");
            let snapshot = Arc::new(state.results.clone());
            let plan = Arc::new(state.plan.clone());
            let mut join_set = JoinSet::new();
            let mut unfinished: Vec<String> = Vec::new();

            for step_id in layer {
                let Some(step) = plan.step(&step_id).cloned() else {
                    continue;
                };
                let controller = controller.clone();
                let semaphore = semaphore.clone();
                let snapshot = snapshot.clone();
                let plan = plan.clone();
                let goal = goal.clone();
                let cancel = cancel.clone();
                join_set.spawn(async move {
                    // a closed semaphore only happens on shutdown; run unbounded then
                    let _permit = semaphore.acquire_owned().await.ok();
                    controller.run_step(&step, &plan, &snapshot, &goal, &cancel).await
                });
                unfinished.push(step_id);
            }

            let mut join_failure = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(run) => {
                        let step_id = run.outcome.result().step_id.clone();
                        unfinished.retain(|id| *id != step_id);
                        state.absorb(run)?;
                    }
                    Err(e) => {
                        error!(error = %e, "Step task failed");
                        join_failure = Some(e.to_string());
                    }
                }
            }
            if let Some(reason) = join_failure
                && state.status.is_completed()
            {
                state.status = RunStatus::Halted {
                    step_id: unfinished.first().cloned().unwrap_or_default(),
                    reason: format!("step task failed: {}", reason),
                };
            }

            if !state.status.is_completed() {
                info!(layer = index, status = %state.status, "Stopping after layer");
                break;
            }
        }
        Ok(())
    }
}

fn validator_for(tools: &[ToolDescriptor]) -> PlanValidator {
    PlanValidator::new().with_known_tools(tools.iter().map(|t| t.name.clone()))
}
