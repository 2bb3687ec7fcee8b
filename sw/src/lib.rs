//! stepweave - plan-execute orchestration for LLM-authored tool-call plans
//!
//! A planner turns a goal into an ordered plan of tool calls whose inputs may
//! reference earlier outputs through `{{stepN.field}}` placeholders. stepweave
//! validates the plan, infers a dependency graph from those references, runs
//! the steps sequentially or in parallel layers, recovers from step failures
//! through operator decisions, and streams a final answer from the results.
//!
//! # Modules
//!
//! - [`domain`] - plans, steps and the append-only result log
//! - [`validation`] - structural plan validation
//! - [`graph`] - dependency inference, cycle detection and layering
//! - [`placeholder`] - placeholder parsing and resolution
//! - [`executor`] - single-step execution with content generation
//! - [`recovery`] - retry / skip / regenerate decisions for failed steps
//! - [`tracker`] - actor holding the live task state of a run
//! - [`synthesis`] - streamed final answer extraction
//! - [`orchestrator`] - drives a whole run
//! - [`simulate`] - schema-stub tool registry for dry runs

pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod events;
pub mod executor;
pub mod graph;
pub mod llm;
pub mod orchestrator;
pub mod placeholder;
pub mod planner;
pub mod prompts;
pub mod recovery;
pub mod simulate;
pub mod synthesis;
pub mod tools;
pub mod tracker;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use domain::{ExecutionResult, Plan, ResultLog, Step};
pub use error::{StepError, StepErrorKind, StepFailure};
pub use events::{EventBus, EventBusSink, FixedDecisionSink, ProgressSink, RunEvent};
pub use graph::{DependencyGraph, ExecutionMode, ExecutionOrder};
pub use llm::{GenerationRequest, LlmError, StreamChunk, TextGenerator};
pub use orchestrator::{Orchestrator, OrchestratorError, RunOutcome, RunStatus};
pub use planner::{LlmPlanner, PlanRequest, Planner, RegenerateRequest};
pub use recovery::{PendingFailure, RecoveryAction};
pub use simulate::SchemaStubRegistry;
pub use synthesis::FinalAnswer;
pub use tools::{LocalToolRegistry, Tool, ToolDescriptor, ToolError, ToolKind, ToolRegistry};
pub use tracker::{StepPhase, TaskStatus, TrackerSnapshot};
pub use validation::{PlanValidator, ValidationReport};
