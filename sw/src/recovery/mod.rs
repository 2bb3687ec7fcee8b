//! Failure recovery
//!
//! A failing step moves through `Detected -> AwaitingDecision ->
//! {Retrying | Regenerating | Skipped} -> Resolved`. The decision itself comes
//! from outside the engine through a [`PendingFailure`] handed to the
//! progress sink.

mod controller;
mod pending;

pub use controller::{FailureRecoveryController, RecoveryState, StepOutcome, StepRun, dependencies_of};
pub use pending::{Decision, FailureContext, PendingFailure, RecoveryAction};
