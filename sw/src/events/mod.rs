//! Progress reporting
//!
//! The engine reports through a [`ProgressSink`]. [`EventBusSink`] turns the
//! callbacks into [`RunEvent`]s on a broadcast [`EventBus`] and keeps pending
//! failures on a [`DecisionBoard`] keyed by step id, so any number of
//! consumers can watch a run and one of them can answer its decisions.

mod bus;
#[cfg(test)]
pub mod mock;
mod reporter;
mod sink;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus};
pub use reporter::Reporter;
pub use sink::{DecisionBoard, DecisionError, EventBusSink, FixedDecisionSink, ProgressSink};
pub use types::RunEvent;
