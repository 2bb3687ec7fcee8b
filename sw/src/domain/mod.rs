//! Domain types: plans, steps and execution results

mod plan;
mod result;

pub use plan::{Plan, Step};
pub use result::{DuplicateResult, ExecutionResult, ResultLog};
