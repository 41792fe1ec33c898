//! Two-phase install state machine
//!
//! NotStarted -> Phase1Running -> AwaitingReboot -> Phase2Running -> Done,
//! with Blocked and Failed absorbing. No state is persisted: Phase 2 starts a
//! fresh machine in AwaitingReboot and re-probes the host.

use serde::Serialize;

use crate::error::{ProvisionError, ProvisionResult};

/// Why a phase stopped without error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum BlockReason {
    UnsupportedEnvironment { distribution: String },
    MissingHardware,
    OperatorAbort,
}

impl BlockReason {
    /// Graceful blocks exit 0; an unsupported OS needs manual work and exits 1
    pub fn is_graceful(&self) -> bool {
        !matches!(self, BlockReason::UnsupportedEnvironment { .. })
    }

    /// Manual next step for blocks that need one
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            BlockReason::UnsupportedEnvironment { .. } => Some(
                "Supported: RHEL/CentOS, Fedora, Ubuntu, SLES. Install dkms, gcc, make and kernel headers manually, then install the driver by hand.",
            ),
            BlockReason::MissingHardware | BlockReason::OperatorAbort => None,
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::UnsupportedEnvironment { distribution } => {
                write!(f, "unsupported distribution '{}'", distribution)
            }
            BlockReason::MissingHardware => write!(f, "no qualifying NVIDIA GPU on this host"),
            BlockReason::OperatorAbort => write!(f, "aborted by operator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PhaseState {
    NotStarted,
    Phase1Running,
    AwaitingReboot,
    Phase2Running,
    Done,
    Blocked { reason: BlockReason },
    Failed { reason: String, exit_code: Option<i32> },
}

impl PhaseState {
    pub fn failed(err: &ProvisionError) -> Self {
        PhaseState::Failed {
            reason: err.to_string(),
            exit_code: err.exit_code(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseState::Done | PhaseState::Blocked { .. } | PhaseState::Failed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PhaseState::NotStarted => "NOT_STARTED",
            PhaseState::Phase1Running => "PHASE1_RUNNING",
            PhaseState::AwaitingReboot => "AWAITING_REBOOT",
            PhaseState::Phase2Running => "PHASE2_RUNNING",
            PhaseState::Done => "DONE",
            PhaseState::Blocked { .. } => "BLOCKED",
            PhaseState::Failed { .. } => "FAILED",
        }
    }

    fn allows(&self, next: &PhaseState) -> bool {
        use PhaseState::*;
        match (self, next) {
            (NotStarted, Phase1Running) => true,
            (Phase1Running, AwaitingReboot) => true,
            (AwaitingReboot, Phase2Running) => true,
            (Phase2Running, Done) => true,
            // Entry preconditions may stop a phase before its body runs
            (NotStarted | AwaitingReboot, Blocked { .. } | Failed { .. }) => true,
            (Phase1Running | Phase2Running, Blocked { .. } | Failed { .. }) => true,
            _ => false,
        }
    }
}

/// Terminal status reported for one invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum InstallOutcome {
    Success,
    Blocked { reason: BlockReason },
    Failed { reason: String, exit_code: Option<i32> },
}

impl InstallOutcome {
    pub fn failed(err: &ProvisionError) -> Self {
        InstallOutcome::Failed {
            reason: err.to_string(),
            exit_code: err.exit_code(),
        }
    }

    pub fn process_exit_code(&self) -> i32 {
        match self {
            InstallOutcome::Success => 0,
            InstallOutcome::Blocked { reason } if reason.is_graceful() => 0,
            InstallOutcome::Blocked { .. } => 1,
            InstallOutcome::Failed { .. } => 1,
        }
    }
}

/// Tracks the current state and rejects out-of-order transitions
#[derive(Debug)]
pub struct PhaseMachine {
    state: PhaseState,
}

impl PhaseMachine {
    /// Phase 1 starts from scratch
    pub fn new() -> Self {
        Self {
            state: PhaseState::NotStarted,
        }
    }

    /// Phase 2 is an operator re-invocation after the reboot
    pub fn after_reboot() -> Self {
        Self {
            state: PhaseState::AwaitingReboot,
        }
    }

    pub fn state(&self) -> &PhaseState {
        &self.state
    }

    pub fn advance(&mut self, next: PhaseState) -> ProvisionResult<()> {
        if !self.state.allows(&next) {
            return Err(ProvisionError::IllegalTransition {
                from: self.state.name().to_string(),
                to: next.name().to_string(),
            });
        }
        tracing::debug!(from = self.state.name(), to = next.name(), "Phase transition");
        self.state = next;
        Ok(())
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
