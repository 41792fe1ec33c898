//! gpuprov Error Types
//!
//! Centralized error handling using thiserror for type-safe errors.

use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Both phases touch the package database, boot image and modprobe config
    #[error("must be run as root (current uid: {uid})")]
    InsufficientPrivileges { uid: String },

    #[error("unsupported distribution '{distribution}'")]
    UnsupportedDistribution { distribution: String },

    #[error("PCI device enumeration failed: {0}")]
    HardwareQueryFailed(String),

    #[error("could not determine loaded kernel modules: {0}")]
    DriverStateUnknown(String),

    #[error("dependency install failed: `{command}` exited with {}", fmt_code(.exit_code))]
    DependencyInstallFailure {
        command: String,
        exit_code: Option<i32>,
    },

    #[error("boot image regeneration exited with {}", fmt_code(.exit_code))]
    BootImageRegenFailure { exit_code: Option<i32> },

    #[error("driver version feed unavailable: {0}")]
    VersionFeedUnavailable(String),

    #[error("driver version resolution ambiguous ({} candidates: {})", .candidates.len(), .candidates.join(", "))]
    AmbiguousVersionResolution { candidates: Vec<String> },

    #[error("driver download failed: {0}")]
    DriverDownloadFailure(#[from] DownloadError),

    #[error("driver installer exited with {}", fmt_code(.exit_code))]
    DriverInstallFailure { exit_code: Option<i32> },

    #[error("driver verification exited with {}", fmt_code(.exit_code))]
    DriverVerificationFailure { exit_code: Option<i32> },

    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("illegal phase transition {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

impl ProvisionError {
    /// Exit code of the child process behind this failure, when there is one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ProvisionError::DependencyInstallFailure { exit_code, .. }
            | ProvisionError::BootImageRegenFailure { exit_code }
            | ProvisionError::DriverInstallFailure { exit_code }
            | ProvisionError::DriverVerificationFailure { exit_code } => *exit_code,
            _ => None,
        }
    }

    /// Operator-facing next step, logged alongside the error
    pub fn remediation(&self) -> &'static str {
        match self {
            ProvisionError::InsufficientPrivileges { .. } => "Re-run with sudo or as root.",
            ProvisionError::UnsupportedDistribution { .. } => {
                "Install dkms, gcc, make and the headers for the running kernel manually, then install the driver by hand."
            }
            ProvisionError::HardwareQueryFailed(_) => {
                "Install pciutils so that `lspci` is available, then re-run."
            }
            ProvisionError::DriverStateUnknown(_) => {
                "Make sure `lsmod` (kmod) works on this host, then re-run with --cont."
            }
            ProvisionError::DependencyInstallFailure { .. } => {
                "Fix the package manager error shown above (repositories, subscription, network), then re-run."
            }
            ProvisionError::BootImageRegenFailure { .. } => {
                "Do NOT reboot yet. Regenerate the initramfs manually and confirm it succeeds before rebooting."
            }
            ProvisionError::VersionFeedUnavailable(_)
            | ProvisionError::AmbiguousVersionResolution { .. } => {
                "Pin a driver version explicitly (GPUPROV_DRIVER_VERSION or pinned_version in the config file) and re-run with --cont."
            }
            ProvisionError::DriverDownloadFailure(_) => {
                "Check network access to the NVIDIA download server and that the version exists, then re-run with --cont."
            }
            ProvisionError::DriverInstallFailure { .. } => {
                "Inspect /var/log/nvidia-installer.log, resolve the failure, then re-run with --cont."
            }
            ProvisionError::DriverVerificationFailure { .. } => {
                "The installer reported success but nvidia-smi failed. Reboot and run nvidia-smi; check dmesg for NVRM errors."
            }
            ProvisionError::Spawn { .. } => "Make sure the named tool is installed and on PATH.",
            ProvisionError::Io(_) => "Check filesystem permissions and free space, then re-run.",
            ProvisionError::Config(_) => "Fix the configuration file and re-run.",
            ProvisionError::IllegalTransition { .. } => "Internal error; please report it.",
        }
    }
}

fn fmt_code(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {}", c),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Download error types
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for provisioning operations
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_only_for_child_failures() {
        let err = ProvisionError::DriverInstallFailure { exit_code: Some(2) };
        assert_eq!(err.exit_code(), Some(2));
        assert_eq!(ProvisionError::HardwareQueryFailed("x".into()).exit_code(), None);
    }

    #[test]
    fn test_ambiguous_message_lists_candidates() {
        let err = ProvisionError::AmbiguousVersionResolution {
            candidates: vec!["535.1".into(), "550.2".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 candidates"));
        assert!(msg.contains("535.1, 550.2"));
        assert!(err.remediation().contains("Pin a driver version"));
    }

    #[test]
    fn test_signal_termination_formatting() {
        let err = ProvisionError::DriverVerificationFailure { exit_code: None };
        assert!(err.to_string().contains("terminated by signal"));
    }
}
