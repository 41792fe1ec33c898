//! Build prerequisites for the NVIDIA installer's DKMS build
//!
//! Each distribution maps to a fixed list of package-manager invocations.
//! Some need a repository-enabling step before the install that depends on it.

use crate::error::{ProvisionError, ProvisionResult};
use crate::hardware::{Distribution, HostProfile};
use crate::runner::{args, command_line, CommandRunner};

/// One package-manager invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    pub program: String,
    pub args: Vec<String>,
}

impl InstallStep {
    fn new(program: &str, arguments: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args(arguments),
        }
    }

    fn with(mut self, extra: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(extra);
        self
    }

    pub fn display(&self) -> String {
        command_line(&self.program, &self.args)
    }
}

/// `name-<k>` when the kernel release is known, otherwise `name`
fn for_kernel(name: &str, kernel: Option<&str>) -> String {
    match kernel {
        Some(k) => format!("{}-{}", name, k),
        None => name.to_string(),
    }
}

/// Ordered install steps for `profile`
pub fn install_plan(profile: &HostProfile) -> ProvisionResult<Vec<InstallStep>> {
    let kernel = profile.kernel_release.as_deref();

    let plan = match profile.distribution {
        Distribution::Rhel => {
            let major = match profile.major_version() {
                Some(major) => major,
                None => {
                    tracing::warn!(
                        version_id = %profile.version_id,
                        "Cannot parse the RHEL major version; assuming 7 (yum, EPEL 7)"
                    );
                    7
                }
            };
            let pm = if major < 8 { "yum" } else { "dnf" };
            let epel = format!(
                "https://dl.fedoraproject.org/pub/epel/epel-release-latest-{}.noarch.rpm",
                major
            );
            vec![
                InstallStep::new(pm, &["-y", "install"]).with([epel]),
                InstallStep::new(pm, &["-y", "install", "dkms", "gcc", "make", "elfutils-libelf-devel"])
                    .with([for_kernel("kernel-devel", kernel), for_kernel("kernel-headers", kernel)]),
            ]
        }
        Distribution::Fedora => vec![
            InstallStep::new("dnf", &["-y", "install", "dkms", "gcc", "make", "elfutils-libelf-devel"])
                .with([for_kernel("kernel-devel", kernel), "kernel-headers".to_string()]),
        ],
        Distribution::Ubuntu => vec![
            InstallStep::new("apt-get", &["-y", "update"]),
            InstallStep::new("apt-get", &["-y", "install", "build-essential", "dkms"])
                .with([for_kernel("linux-headers", kernel)]),
        ],
        Distribution::Sles => vec![
            InstallStep::new("zypper", &["--non-interactive", "refresh"]),
            InstallStep::new(
                "zypper",
                &["--non-interactive", "install", "gcc", "make", "dkms", "kernel-default-devel"],
            ),
        ],
        Distribution::Unknown => {
            return Err(ProvisionError::UnsupportedDistribution {
                distribution: profile.distribution.to_string(),
            })
        }
    };
    Ok(plan)
}

/// Install the prerequisites for `profile`. Stops at the first failing step.
pub async fn install_prerequisites(profile: &HostProfile, runner: &dyn CommandRunner) -> ProvisionResult<()> {
    let plan = install_plan(profile)?;

    for step in &plan {
        tracing::info!(command = %step.display(), "Installing prerequisites");
        let outcome = match runner.run(&step.program, &step.args).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("{}", e);
                return Err(ProvisionError::DependencyInstallFailure {
                    command: step.display(),
                    exit_code: None,
                });
            }
        };
        if !outcome.success() {
            tracing::error!(exit_code = ?outcome.exit_code, "Package manager output:\n{}", outcome.tail(15));
            return Err(ProvisionError::DependencyInstallFailure {
                command: step.display(),
                exit_code: outcome.exit_code,
            });
        }
    }

    tracing::info!(steps = plan.len(), "Prerequisites installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::testing::capture;
    use crate::runner::testing::ScriptedRunner;
    use crate::runner::CommandOutcome;

    fn profile(distribution: Distribution, version: &str, kernel: Option<&str>) -> HostProfile {
        HostProfile {
            distribution,
            version_id: version.to_string(),
            kernel_release: kernel.map(str::to_string),
        }
    }

    #[test]
    fn test_rhel7_enables_epel_before_dkms() {
        let plan = install_plan(&profile(Distribution::Rhel, "7.9.2009", Some("3.10.0-1160.el7.x86_64"))).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].program, "yum");
        assert!(plan[0].display().contains("epel-release-latest-7"));
        assert!(plan[1].args.contains(&"dkms".to_string()));
        assert!(plan[1].args.contains(&"kernel-devel-3.10.0-1160.el7.x86_64".to_string()));
    }

    #[test]
    fn test_rhel8_uses_dnf() {
        let plan = install_plan(&profile(Distribution::Rhel, "8.6", None)).unwrap();
        assert!(plan.iter().all(|s| s.program == "dnf"));
        assert!(plan[1].args.contains(&"kernel-devel".to_string()));
    }

    #[test]
    fn test_unparsable_rhel_version_falls_back_loudly() {
        let (plan, logs) = capture(|| install_plan(&profile(Distribution::Rhel, "", None)));
        let plan = plan.unwrap();
        assert_eq!(plan[0].program, "yum");
        assert!(plan[0].display().contains("epel-release-latest-7"));
        assert!(
            logs.lines()
                .any(|l| l.contains(" - WARNING: ") && l.contains("Cannot parse the RHEL major version")),
            "{logs}"
        );
    }

    #[test]
    fn test_parsable_rhel_version_is_quiet() {
        let (_, logs) = capture(|| install_plan(&profile(Distribution::Rhel, "8.6", None)));
        assert!(!logs.contains("WARNING"), "{logs}");
    }

    #[test]
    fn test_ubuntu_updates_then_installs_headers() {
        let plan = install_plan(&profile(Distribution::Ubuntu, "22.04", Some("5.15.0-1034-azure"))).unwrap();
        assert_eq!(plan[0].display(), "apt-get -y update");
        assert_eq!(
            plan[1].display(),
            "apt-get -y install build-essential dkms linux-headers-5.15.0-1034-azure"
        );
    }

    #[test]
    fn test_unknown_distribution_fails_closed() {
        let err = install_plan(&HostProfile::unknown()).unwrap_err();
        assert!(matches!(err, ProvisionError::UnsupportedDistribution { .. }));
    }

    #[tokio::test]
    async fn test_first_step_failure_halts() {
        let host = profile(Distribution::Ubuntu, "20.04", Some("5.4.0-1"));
        let runner = ScriptedRunner::new().respond("apt-get -y update", CommandOutcome::failed(100, "E: network"));
        let err = install_prerequisites(&host, &runner).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(100));
        assert!(!runner.ran("apt-get -y install"));
    }

    #[tokio::test]
    async fn test_missing_package_manager_is_failure() {
        let host = profile(Distribution::Sles, "15.4", None);
        let runner = ScriptedRunner::new().missing("zypper");
        let err = install_prerequisites(&host, &runner).await.unwrap_err();
        assert!(matches!(err, ProvisionError::DependencyInstallFailure { exit_code: None, .. }));
    }

    #[tokio::test]
    async fn test_all_steps_run_in_order() {
        let host = profile(Distribution::Sles, "15.4", None);
        let runner = ScriptedRunner::new();
        install_prerequisites(&host, &runner).await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "zypper --non-interactive refresh".to_string(),
                "zypper --non-interactive install gcc make dkms kernel-default-devel".to_string(),
            ]
        );
    }
}
