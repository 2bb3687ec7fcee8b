//! Prompt templates
//!
//! Template loading chain:
//! 1. `{prompts.dir}/{name}.pmt` (user override)
//! 2. Embedded default compiled into the binary
//!
//! Templates use Handlebars syntax with HTML escaping disabled.

mod context;
pub mod embedded;
mod renderer;

pub use context::{
    ContentContext, FinalAnswerContext, PlanContext, PriorOutput, REFERENCE_SYNTAX, RegenerateContext, ResultSummary,
    ToolSummary, truncate_chars,
};
pub use renderer::{PromptError, PromptRenderer};
