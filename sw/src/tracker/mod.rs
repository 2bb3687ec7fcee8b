//! Execution tracker
//!
//! An actor that owns the live task list, one [`Task`] per plan step.
//! Progress consumers read it through [`ExecutionTracker::snapshot`].

mod manager;
mod messages;
mod task;

pub use manager::ExecutionTracker;
pub use messages::{TrackerCommand, TrackerError, TrackerResponse};
pub use task::{StepPhase, Task, TaskStatus, ToolCallRecord, TrackerSnapshot};
