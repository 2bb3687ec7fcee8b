//! Tool system
//!
//! The orchestrator never implements tools itself: it reads their declared
//! contracts and invokes them through a [`ToolRegistry`]. [`LocalToolRegistry`]
//! hosts in-process [`Tool`] implementations.

mod error;
#[cfg(test)]
pub mod mock;
mod registry;
mod traits;

pub use error::ToolError;
pub use registry::{LocalToolRegistry, ToolRegistry};
pub use traits::{Tool, ToolDescriptor, ToolKind};
