//! Step executor
//!
//! Runs one attempt of one step: resolve placeholders, optionally generate
//! content for a content-generation tool, invoke the tool under a completion
//! timeout, and shape the output into an [`ExecutionResult`]. Failures come
//! back as [`AttemptFailure`] carrying whatever input was reached, so a retry
//! can resume with the same bytes.

mod content;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::domain::{ExecutionResult, ResultLog, Step};
use crate::error::StepError;
use crate::events::Reporter;
use crate::llm::TextGenerator;
use crate::placeholder::{PlaceholderResolver, ResolvedInput};
use crate::prompts::PromptRenderer;
use crate::tools::{ToolDescriptor, ToolRegistry};
use crate::tracker::{StepPhase, ToolCallRecord};

/// Per-attempt inputs shared with the rest of the run
#[derive(Debug, Clone, Copy)]
pub struct AttemptContext<'a> {
    pub goal: &'a str,
    pub cancel: &'a CancellationToken,
    /// Steps whose outputs this step consumes
    pub depends_on: &'a [String],
}

/// Where a retry picks up
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint {
    /// Placeholders resolved; content generation (if any) still to run
    Resolved(ResolvedInput),
    /// Final tool input, content included
    ToolReady(ResolvedInput),
}

impl ResumePoint {
    pub fn input(&self) -> &ResolvedInput {
        match self {
            ResumePoint::Resolved(input) | ResumePoint::ToolReady(input) => input,
        }
    }
}

/// A failed attempt
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub error: StepError,
    /// Furthest input reached; `None` when resolution itself failed
    pub resume: Option<ResumePoint>,
}

impl AttemptFailure {
    fn before_resolution(error: StepError) -> Self {
        Self { error, resume: None }
    }

    /// Input to record on the failed result
    pub fn recorded_input(&self) -> Value {
        self.resume
            .as_ref()
            .map(|point| point.input().value.clone())
            .unwrap_or(Value::Null)
    }
}

/// Executes single step attempts against a tool registry
pub struct StepExecutor {
    registry: Arc<dyn ToolRegistry>,
    generator: Option<Arc<dyn TextGenerator>>,
    renderer: Arc<PromptRenderer>,
    resolver: PlaceholderResolver,
    config: EngineConfig,
    reporter: Reporter,
    tools: HashMap<String, ToolDescriptor>,
}

impl StepExecutor {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        tools: Vec<ToolDescriptor>,
        config: EngineConfig,
        reporter: Reporter,
    ) -> Self {
        debug!(tool_count = tools.len(), "StepExecutor::new: called");
        Self {
            registry,
            generator: None,
            renderer: Arc::new(PromptRenderer::embedded_only()),
            resolver: PlaceholderResolver::new(config.array_policy),
            config,
            reporter,
            tools: tools.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<PromptRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn descriptor(&self, tool: &str) -> Option<&ToolDescriptor> {
        self.tools.get(tool)
    }

    /// Run one full attempt, starting from placeholder resolution
    pub async fn execute(
        &self,
        step: &Step,
        results: &ResultLog,
        ctx: &AttemptContext<'_>,
    ) -> Result<ExecutionResult, AttemptFailure> {
        debug!(step_id = %step.step_id, tool = %step.tool, "StepExecutor::execute: called");
        if ctx.cancel.is_cancelled() {
            return Err(AttemptFailure::before_resolution(StepError::Aborted {
                step_id: step.step_id.clone(),
            }));
        }

        self.reporter.phase(&step.step_id, StepPhase::ResolvingInput).await;
        let resolved = self
            .resolver
            .resolve(&step.raw_input, results, self.tools.get(&step.tool))
            .map_err(|e| {
                info!(step_id = %step.step_id, placeholder = %e.placeholder, "Placeholder resolution failed");
                AttemptFailure::before_resolution(e.into())
            })?;

        self.execute_resolved(step, ResumePoint::Resolved(resolved), results, ctx)
            .await
    }

    /// Continue an attempt from an already resolved input
    pub async fn execute_resolved(
        &self,
        step: &Step,
        from: ResumePoint,
        results: &ResultLog,
        ctx: &AttemptContext<'_>,
    ) -> Result<ExecutionResult, AttemptFailure> {
        debug!(step_id = %step.step_id, tool_ready = matches!(from, ResumePoint::ToolReady(_)), "StepExecutor::execute_resolved: called");
        let input = match from {
            ResumePoint::ToolReady(input) => input,
            ResumePoint::Resolved(mut input) => {
                let content_field = self
                    .tools
                    .get(&step.tool)
                    .and_then(|d| d.content_field())
                    .map(str::to_string);
                if let Some(field) = content_field {
                    let pristine = input.clone();
                    if let Err(error) = self.generate_content(step, &field, &mut input, results, ctx).await {
                        return Err(AttemptFailure {
                            error,
                            resume: Some(ResumePoint::Resolved(pristine)),
                        });
                    }
                }
                input
            }
        };

        self.reporter.phase(&step.step_id, StepPhase::InvokingTool).await;
        match self.invoke_all(step, &input, ctx).await {
            Ok(output) => Ok(ExecutionResult::success(
                &step.step_id,
                &step.tool,
                input.value,
                output,
            )),
            Err(error) => Err(AttemptFailure {
                error,
                resume: Some(ResumePoint::ToolReady(input)),
            }),
        }
    }

    /// One call per invocation; fan-outs are aggregated as `{"results": [...]}`
    async fn invoke_all(&self, step: &Step, input: &ResolvedInput, ctx: &AttemptContext<'_>) -> Result<Value, StepError> {
        let invocations = input.invocations();
        if input.fan_out.is_none() {
            let args = invocations.into_iter().next().unwrap_or(Value::Null);
            let output = self.invoke(step, args, ctx).await?;
            return Ok(normalize_output(output));
        }

        info!(step_id = %step.step_id, calls = invocations.len(), "Invoking batched tool per element");
        let outputs = futures::future::join_all(invocations.into_iter().map(|args| self.invoke(step, args, ctx))).await;
        let outputs = outputs.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(json!({ "results": outputs }))
    }

    async fn invoke(&self, step: &Step, args: Value, ctx: &AttemptContext<'_>) -> Result<Value, StepError> {
        debug!(step_id = %step.step_id, tool = %step.tool, "StepExecutor::invoke: called");
        let timeout = self.config.tool_timeout();
        let started_at = Utc::now();
        let started = Instant::now();

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                info!(step_id = %step.step_id, "Tool call aborted");
                Err(StepError::Aborted { step_id: step.step_id.clone() })
            }
            called = tokio::time::timeout(timeout, self.registry.call(&step.tool, args.clone())) => match called {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => {
                    warn!(step_id = %step.step_id, tool = %step.tool, error = %e, "Tool reported an error");
                    Err(StepError::ToolExecution { tool: step.tool.clone(), message: e.to_string() })
                }
                Err(_) => {
                    warn!(step_id = %step.step_id, tool = %step.tool, ?timeout, "Tool call timed out");
                    Err(StepError::ToolTimeout { tool: step.tool.clone(), timeout })
                }
            },
        };

        let record = ToolCallRecord {
            tool: step.tool.clone(),
            input: args,
            success: outcome.is_ok(),
            error: outcome.as_ref().err().map(|e| e.to_string()),
            duration_ms: started.elapsed().as_millis() as u64,
            started_at,
        };
        self.reporter.tool_call(&step.step_id, record).await;
        outcome
    }
}

/// Make every output addressable by field
fn normalize_output(output: Value) -> Value {
    match output {
        Value::Object(_) => output,
        other => json!({ "result": other }),
    }
}
