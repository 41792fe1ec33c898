//! Phase state tracking for a single invocation.

pub mod phase;

pub use phase::{BlockReason, InstallOutcome, PhaseMachine, PhaseState};
