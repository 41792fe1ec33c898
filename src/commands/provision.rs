//! Phase Orchestration
//!
//! Phase 1 (pre-reboot): gate on OS, hardware and driver state, then install
//! prerequisites, exclude nouveau and regenerate the boot image.
//! Phase 2 (post-reboot, `--cont`): install the NVIDIA driver unless it is
//! already loaded, then verify it with nvidia-smi.

use serde::Serialize;

use crate::commands::prompt::{OperatorPrompt, PromptAnswer};
use crate::commands::Phase;
use crate::config::Config;
use crate::error::{ProvisionError, ProvisionResult};
use crate::hardware::{identify_host, scan_hardware, scan_loaded_drivers, Detection, DriverState};
use crate::runner::{args, CommandRunner};
use crate::setup::blacklist::{suppress_conflicting_driver, MarkerStatus};
use crate::setup::downloader::Fetcher;
use crate::setup::driver::{fetch_installer, install_driver, verify_driver};
use crate::setup::initramfs::regenerate_boot_image;
use crate::setup::packages::install_prerequisites;
use crate::setup::paths::HostPaths;
use crate::setup::version::VersionResolver;
use crate::state::{BlockReason, InstallOutcome, PhaseMachine, PhaseState};

/// Result of one invocation
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub state: PhaseState,
    pub outcome: InstallOutcome,
}

impl PhaseReport {
    pub fn exit_code(&self) -> i32 {
        self.outcome.process_exit_code()
    }
}

/// Why a phase body stopped early
enum Halt {
    Blocked(BlockReason),
    Failed(ProvisionError),
}

impl From<ProvisionError> for Halt {
    fn from(err: ProvisionError) -> Self {
        Halt::Failed(err)
    }
}

pub struct Provisioner<R, F, P> {
    runner: R,
    fetcher: F,
    prompt: P,
    paths: HostPaths,
    config: Config,
}

impl<R, F, P> Provisioner<R, F, P>
where
    R: CommandRunner,
    F: Fetcher,
    P: OperatorPrompt,
{
    pub fn new(runner: R, fetcher: F, prompt: P, paths: HostPaths, config: Config) -> Self {
        Self {
            runner,
            fetcher,
            prompt,
            paths,
            config,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn prompt(&self) -> &P {
        &self.prompt
    }

    /// Run one phase to a terminal or waiting state
    pub async fn run(&self, phase: Phase) -> PhaseReport {
        tracing::info!(phase = phase.as_str(), "gpuprov {} starting", env!("CARGO_PKG_VERSION"));

        let mut machine = match phase {
            Phase::PreReboot => PhaseMachine::new(),
            Phase::PostReboot => PhaseMachine::after_reboot(),
        };

        let result = match phase {
            Phase::PreReboot => self.phase_one(&mut machine).await,
            Phase::PostReboot => self.phase_two(&mut machine).await,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(Halt::Blocked(reason)) => {
                if reason.is_graceful() {
                    tracing::info!("Stopping: {}", reason);
                } else {
                    tracing::error!("Stopping: {}", reason);
                }
                if let Some(guidance) = reason.guidance() {
                    tracing::error!("{}", guidance);
                }
                self.settle(&mut machine, PhaseState::Blocked { reason: reason.clone() });
                InstallOutcome::Blocked { reason }
            }
            Err(Halt::Failed(err)) => {
                tracing::error!("FAILED: {}", err);
                tracing::error!("{}", err.remediation());
                self.settle(&mut machine, PhaseState::failed(&err));
                InstallOutcome::failed(&err)
            }
        };

        let report = PhaseReport {
            phase,
            state: machine.state().clone(),
            outcome,
        };
        if let Ok(summary) = serde_json::to_string(&report) {
            tracing::debug!(summary = %summary, "Run summary");
        }
        report
    }

    /// Move into a terminal state; an illegal move is logged, never panics
    fn settle(&self, machine: &mut PhaseMachine, next: PhaseState) {
        if let Err(e) = machine.advance(next) {
            tracing::error!("{}", e);
        }
    }

    async fn require_root(&self) -> Result<(), Halt> {
        let outcome = self.runner.run("id", &args(&["-u"])).await?;
        let uid = outcome.stdout.trim().to_string();
        if outcome.success() && uid == "0" {
            Ok(())
        } else {
            Err(Halt::Failed(ProvisionError::InsufficientPrivileges { uid }))
        }
    }

    async fn probe_drivers(&self) -> DriverState {
        scan_loaded_drivers(&self.runner, &self.config.vendor, &self.config.conflicting_driver).await
    }

    async fn phase_one(&self, machine: &mut PhaseMachine) -> Result<InstallOutcome, Halt> {
        self.require_root().await?;

        let profile = identify_host(&self.paths);
        if !profile.distribution.is_supported() {
            return Err(Halt::Blocked(BlockReason::UnsupportedEnvironment {
                distribution: profile.distribution.to_string(),
            }));
        }

        let inventory = scan_hardware(&self.runner, &self.config.vendor).await;
        if let Some(reason) = inventory.query_error {
            return Err(Halt::Failed(ProvisionError::HardwareQueryFailed(reason)));
        }
        if inventory.is_empty() {
            return Err(Halt::Blocked(BlockReason::MissingHardware));
        }
        tracing::info!(count = inventory.len(), "Qualifying GPU(s) found");

        let drivers = self.probe_drivers().await;
        match &drivers.target_driver {
            Detection::Found => {
                let message = format!(
                    "The {} driver is already loaded ({}). Re-running setup is safe, but an upgrade requires removing the current driver first.",
                    self.config.vendor,
                    drivers.target_driver_modules.join(", ")
                );
                let answer = self.prompt.confirm(&message, self.config.prompt_timeout()).await;
                if answer == PromptAnswer::Interrupted {
                    return Err(Halt::Blocked(BlockReason::OperatorAbort));
                }
            }
            Detection::QueryFailed(reason) => {
                tracing::warn!("Could not determine loaded drivers ({}); continuing", reason);
            }
            Detection::NotFound => {}
        }

        machine.advance(PhaseState::Phase1Running)?;

        if drivers.conflicting_driver_loaded() {
            tracing::info!(
                modules = %drivers.conflicting_driver_modules.join(", "),
                "{} is loaded",
                self.config.conflicting_driver
            );
        }

        install_prerequisites(&profile, &self.runner).await?;

        let marker = self.paths.resolve(&self.config.marker_file);
        if let MarkerStatus::MissingDirective { .. } =
            suppress_conflicting_driver(&marker, &self.config.conflicting_driver)?
        {
            tracing::warn!(
                "{} may still load after reboot; fix {} before rebooting",
                self.config.conflicting_driver,
                marker.display()
            );
        }

        let regen = regenerate_boot_image(&profile, &self.paths, &self.runner).await?;

        machine.advance(PhaseState::AwaitingReboot)?;

        if regen.success() {
            tracing::info!("Phase 1 complete. Reboot now, then run again with --cont");
            Ok(InstallOutcome::Success)
        } else {
            let err = ProvisionError::BootImageRegenFailure {
                exit_code: regen.exit_code,
            };
            tracing::error!("FAILED: {}\n{}", err, regen.tail(15));
            tracing::error!("{}", err.remediation());
            tracing::error!("After fixing it, reboot and run again with --cont");
            Ok(InstallOutcome::failed(&err))
        }
    }

    async fn phase_two(&self, machine: &mut PhaseMachine) -> Result<InstallOutcome, Halt> {
        self.require_root().await?;
        machine.advance(PhaseState::Phase2Running)?;

        let drivers = self.probe_drivers().await;
        if let Detection::QueryFailed(reason) = &drivers.target_driver {
            return Err(Halt::Failed(ProvisionError::DriverStateUnknown(reason.clone())));
        }
        if drivers.conflicting_driver_loaded() {
            tracing::warn!(
                modules = %drivers.conflicting_driver_modules.join(", "),
                "{} is still loaded; was the host rebooted after phase 1?",
                self.config.conflicting_driver
            );
        }

        if drivers.target_driver_loaded() {
            tracing::warn!(
                "{} driver already loaded; skipping install (upgrade requires manual removal first)",
                self.config.vendor
            );
        } else {
            self.install().await?;
        }

        verify_driver(&self.runner).await?;

        machine.advance(PhaseState::Done)?;
        tracing::info!("Driver installed and verified. Reboot once more and run nvidia-smi to confirm");
        Ok(InstallOutcome::Success)
    }

    async fn install(&self) -> ProvisionResult<()> {
        let resolver = VersionResolver::new(&self.config.version_feed_url, &self.config.version_label);
        let version = resolver
            .resolve(self.config.pinned_version.as_deref(), &self.fetcher)
            .await?;

        let download_dir = self.paths.resolve(&self.config.download_dir);
        let installer = fetch_installer(
            &self.fetcher,
            &self.config.download_base_url,
            &version,
            &download_dir,
        )
        .await?;

        install_driver(&self.runner, &installer).await
    }
}
