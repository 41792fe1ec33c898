//! Loaded kernel driver detection via `lsmod`.

use serde::Serialize;

use super::Detection;
use crate::runner::CommandRunner;

/// Which of the two drivers are currently loaded. Re-derived every phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverState {
    pub target_driver: Detection,
    pub conflicting_driver: Detection,
    pub target_driver_modules: Vec<String>,
    pub conflicting_driver_modules: Vec<String>,
}

impl DriverState {
    pub fn target_driver_loaded(&self) -> bool {
        self.target_driver.is_found()
    }

    pub fn conflicting_driver_loaded(&self) -> bool {
        self.conflicting_driver.is_found()
    }

    fn query_failed(reason: String) -> Self {
        DriverState {
            target_driver: Detection::QueryFailed(reason.clone()),
            conflicting_driver: Detection::QueryFailed(reason),
            target_driver_modules: Vec::new(),
            conflicting_driver_modules: Vec::new(),
        }
    }
}

/// Inspect the active module list for `target` and `conflicting` drivers
pub async fn scan_loaded_drivers(
    runner: &dyn CommandRunner,
    target: &str,
    conflicting: &str,
) -> DriverState {
    let listing = match runner.run("lsmod", &[]).await {
        Ok(outcome) if outcome.success() => outcome.stdout,
        Ok(outcome) => {
            return DriverState::query_failed(format!(
                "lsmod exited with {:?}: {}",
                outcome.exit_code,
                outcome.tail(3)
            ))
        }
        Err(e) => return DriverState::query_failed(e.to_string()),
    };

    let target = target.to_lowercase();
    let conflicting = conflicting.to_lowercase();
    let mut target_modules = Vec::new();
    let mut conflicting_modules = Vec::new();

    // "Module                  Size  Used by" header, then one module per row
    for name in listing
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .filter(|n| *n != "Module")
    {
        let lower = name.to_lowercase();
        if belongs_to(&lower, &target) {
            target_modules.push(name.to_string());
        }
        if belongs_to(&lower, &conflicting) {
            conflicting_modules.push(name.to_string());
        }
    }

    let state = DriverState {
        target_driver: Detection::from_presence(!target_modules.is_empty()),
        conflicting_driver: Detection::from_presence(!conflicting_modules.is_empty()),
        target_driver_modules: target_modules,
        conflicting_driver_modules: conflicting_modules,
    };
    tracing::debug!(
        target = ?state.target_driver,
        conflicting = ?state.conflicting_driver,
        "Scanned loaded kernel modules"
    );
    state
}

/// `driver` itself or one of its `driver_*` companions (nvidia_uvm, nvidia_drm).
/// Unrelated modules that merely mention the name (i2c_nvidia_gpu, nvidiafb)
/// do not count.
fn belongs_to(module: &str, driver: &str) -> bool {
    module == driver
        || module
            .strip_prefix(driver)
            .is_some_and(|rest| rest.starts_with('_'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::ScriptedRunner;
    use crate::runner::CommandOutcome;

    const LSMOD_TRANSITION: &str = "Module                  Size  Used by\n\
nvidia_uvm            1200128  0\n\
nouveau              2215936  1\n\
nvidia              35323904  1 nvidia_uvm\n\
mxm_wmi                16384  1 nouveau\n\
drm_kms_helper        184320  1 nouveau\n";

    #[tokio::test]
    async fn test_both_drivers_may_be_loaded() {
        let runner = ScriptedRunner::new().respond("lsmod", CommandOutcome::ok(LSMOD_TRANSITION));
        let state = scan_loaded_drivers(&runner, "nvidia", "nouveau").await;
        assert!(state.target_driver_loaded());
        assert!(state.conflicting_driver_loaded());
        assert_eq!(state.target_driver_modules, vec!["nvidia_uvm", "nvidia"]);
        assert_eq!(state.conflicting_driver_modules, vec!["nouveau"]);
    }

    #[tokio::test]
    async fn test_match_is_case_insensitive() {
        let runner = ScriptedRunner::new().respond(
            "lsmod",
            CommandOutcome::ok("Module Size Used by\nNVIDIA 1 0\n"),
        );
        let state = scan_loaded_drivers(&runner, "nvidia", "nouveau").await;
        assert!(state.target_driver_loaded());
        assert_eq!(state.conflicting_driver, Detection::NotFound);
    }

    #[tokio::test]
    async fn test_modules_that_only_mention_the_driver_do_not_count() {
        let listing = "Module                  Size  Used by\n\
i2c_nvidia_gpu         16384  0\n\
nvidiafb               53248  0\n\
nouveau              2215936  1\n";
        let runner = ScriptedRunner::new().respond("lsmod", CommandOutcome::ok(listing));
        let state = scan_loaded_drivers(&runner, "nvidia", "nouveau").await;
        assert_eq!(state.target_driver, Detection::NotFound);
        assert!(state.target_driver_modules.is_empty());
        assert!(state.conflicting_driver_loaded());
    }

    #[test]
    fn test_companion_module_naming() {
        assert!(belongs_to("nvidia", "nvidia"));
        assert!(belongs_to("nvidia_drm", "nvidia"));
        assert!(!belongs_to("nvidiafb", "nvidia"));
        assert!(!belongs_to("i2c_nvidia_gpu", "nvidia"));
    }

    #[tokio::test]
    async fn test_lsmod_failure_is_not_not_found() {
        let runner = ScriptedRunner::new().respond("lsmod", CommandOutcome::failed(1, "kmod broke"));
        let state = scan_loaded_drivers(&runner, "nvidia", "nouveau").await;
        assert!(matches!(state.target_driver, Detection::QueryFailed(_)));
        assert!(matches!(state.conflicting_driver, Detection::QueryFailed(_)));
        assert!(!state.target_driver_loaded());
    }
}
