//! ExecutionTracker - actor that owns the task list
//!
//! Every mutation goes through one mpsc queue, so concurrent DAG branches
//! never touch shared state directly. The tracker mirrors what the
//! orchestrator reports and makes no scheduling decisions.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::ExecutionResult;

use super::messages::{TrackerCommand, TrackerError, TrackerResponse};
use super::task::{StepPhase, Task, ToolCallRecord, TrackerSnapshot};

/// Handle to send commands to the tracker actor
#[derive(Debug, Clone)]
pub struct ExecutionTracker {
    tx: mpsc::Sender<TrackerCommand>,
}

impl ExecutionTracker {
    /// Spawn a new tracker actor
    pub fn spawn() -> Self {
        debug!("ExecutionTracker::spawn: called");
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(rx));
        info!("ExecutionTracker spawned");
        Self { tx }
    }

    async fn send(&self, cmd: TrackerCommand) -> TrackerResponse<()> {
        self.tx.send(cmd).await.map_err(|_| TrackerError::ChannelError)
    }

    /// Register one pending task per `(step_id, tool)`
    pub async fn register_plan(&self, steps: Vec<(String, String)>) -> TrackerResponse<()> {
        debug!(step_count = steps.len(), "register_plan: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(TrackerCommand::RegisterPlan { steps, reply: reply_tx })
            .await?;
        reply_rx.await.map_err(|_| TrackerError::ChannelError)?
    }

    pub async fn phase(&self, step_id: &str, phase: StepPhase) -> TrackerResponse<()> {
        debug!(%step_id, %phase, "phase: called");
        self.send(TrackerCommand::Phase {
            step_id: step_id.to_string(),
            phase,
        })
        .await
    }

    pub async fn tool_call(&self, step_id: &str, record: ToolCallRecord) -> TrackerResponse<()> {
        debug!(%step_id, tool = %record.tool, success = record.success, "tool_call: called");
        self.send(TrackerCommand::ToolCall {
            step_id: step_id.to_string(),
            record,
        })
        .await
    }

    pub async fn apply_result(&self, result: &ExecutionResult) -> TrackerResponse<()> {
        debug!(step_id = %result.step_id, success = result.success, "apply_result: called");
        self.send(TrackerCommand::ApplyResult {
            result: Box::new(result.clone()),
        })
        .await
    }

    /// Record that a step's definition was regenerated
    pub async fn replace_step(&self, step_id: &str, tool: &str) -> TrackerResponse<()> {
        debug!(%step_id, %tool, "replace_step: called");
        self.send(TrackerCommand::ReplaceStep {
            step_id: step_id.to_string(),
            tool: tool.to_string(),
        })
        .await
    }

    /// Read-only copy of the current tasks
    pub async fn snapshot(&self) -> TrackerResponse<TrackerSnapshot> {
        debug!("snapshot: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(TrackerCommand::Snapshot { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| TrackerError::ChannelError)
    }

    pub async fn shutdown(&self) -> TrackerResponse<()> {
        debug!("shutdown: called");
        self.send(TrackerCommand::Shutdown).await
    }
}

fn find<'a>(tasks: &'a mut [Task], step_id: &str) -> Option<&'a mut Task> {
    let task = tasks.iter_mut().find(|t| t.id == step_id);
    if task.is_none() {
        warn!(%step_id, "Tracker update for unknown task ignored");
    }
    task
}

async fn actor_loop(mut rx: mpsc::Receiver<TrackerCommand>) {
    debug!("ExecutionTracker actor started");
    let mut tasks: Vec<Task> = Vec::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TrackerCommand::RegisterPlan { steps, reply } => {
                debug!(step_count = steps.len(), "actor_loop: RegisterPlan command");
                tasks = steps.into_iter().map(|(id, tool)| Task::new(id, tool)).collect();
                let _ = reply.send(Ok(()));
            }

            TrackerCommand::Phase { step_id, phase } => {
                debug!(%step_id, %phase, "actor_loop: Phase command");
                if let Some(task) = find(&mut tasks, &step_id) {
                    task.enter_phase(phase);
                }
            }

            TrackerCommand::ToolCall { step_id, record } => {
                debug!(%step_id, "actor_loop: ToolCall command");
                if let Some(task) = find(&mut tasks, &step_id) {
                    task.tool_calls.push(record);
                }
            }

            TrackerCommand::ApplyResult { result } => {
                debug!(step_id = %result.step_id, "actor_loop: ApplyResult command");
                if let Some(task) = find(&mut tasks, &result.step_id) {
                    task.apply_result(&result);
                }
            }

            TrackerCommand::ReplaceStep { step_id, tool } => {
                debug!(%step_id, %tool, "actor_loop: ReplaceStep command");
                if let Some(task) = find(&mut tasks, &step_id) {
                    task.tool = tool;
                    task.enter_phase(StepPhase::Regenerating);
                }
            }

            TrackerCommand::Snapshot { reply } => {
                debug!(task_count = tasks.len(), "actor_loop: Snapshot command");
                let _ = reply.send(TrackerSnapshot { tasks: tasks.clone() });
            }

            TrackerCommand::Shutdown => {
                debug!("actor_loop: Shutdown command");
                break;
            }
        }
    }

    info!("ExecutionTracker actor stopped");
}
