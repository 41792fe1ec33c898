//! NVIDIA installer fetch, unattended install and post-install verification.

use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, ProvisionResult};
use crate::runner::{args, CommandRunner};
use crate::setup::downloader::Fetcher;

/// Flags for an unattended install that registers the module with DKMS
pub const INSTALLER_FLAGS: [&str; 2] = ["--silent", "--dkms"];

/// Vendor utility that only succeeds when the driver is operative
pub const VERIFY_COMMAND: &str = "nvidia-smi";

pub fn installer_file_name(version: &str) -> String {
    format!("NVIDIA-Linux-x86_64-{}.run", version)
}

pub fn installer_url(base_url: &str, version: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        version,
        installer_file_name(version)
    )
}

/// Download the installer for `version` into `download_dir`.
/// A previously completed download is reused.
pub async fn fetch_installer(
    fetcher: &dyn Fetcher,
    base_url: &str,
    version: &str,
    download_dir: &Path,
) -> ProvisionResult<PathBuf> {
    let dest = download_dir.join(installer_file_name(version));
    let reusable = std::fs::metadata(&dest).map(|m| m.len() > 0).unwrap_or(false);
    if reusable {
        tracing::info!(path = %dest.display(), "Installer already downloaded");
        return Ok(dest);
    }

    let url = installer_url(base_url, version);
    fetcher.download(&url, &dest).await?;
    Ok(dest)
}

/// chmod 0755 and run the installer unattended
pub async fn install_driver(runner: &dyn CommandRunner, installer: &Path) -> ProvisionResult<()> {
    mark_executable(installer)?;

    let program = installer.to_string_lossy();
    tracing::info!(installer = %program, "Running NVIDIA installer");
    let outcome = runner.run(&program, &args(&INSTALLER_FLAGS)).await?;
    if !outcome.success() {
        tracing::error!(exit_code = ?outcome.exit_code, "Installer output:\n{}", outcome.tail(20));
        return Err(ProvisionError::DriverInstallFailure {
            exit_code: outcome.exit_code,
        });
    }
    tracing::info!("NVIDIA installer finished");
    Ok(())
}

/// Run the vendor verification utility. Installer success alone proves nothing.
pub async fn verify_driver(runner: &dyn CommandRunner) -> ProvisionResult<()> {
    let outcome = match runner.run(VERIFY_COMMAND, &[]).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!("{}", e);
            return Err(ProvisionError::DriverVerificationFailure { exit_code: None });
        }
    };
    if !outcome.success() {
        tracing::error!(exit_code = ?outcome.exit_code, "{} output:\n{}", VERIFY_COMMAND, outcome.tail(10));
        return Err(ProvisionError::DriverVerificationFailure {
            exit_code: outcome.exit_code,
        });
    }
    tracing::info!("{} reports:\n{}", VERIFY_COMMAND, outcome.stdout.trim_end());
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> ProvisionResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> ProvisionResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::ScriptedRunner;
    use crate::runner::CommandOutcome;
    use crate::setup::downloader::testing::FakeFetcher;
    use tempfile::tempdir;

    const BASE: &str = "https://us.download.nvidia.com/XFree86/Linux-x86_64/";

    #[test]
    fn test_installer_url() {
        assert_eq!(
            installer_url(BASE, "535.129.03"),
            "https://us.download.nvidia.com/XFree86/Linux-x86_64/535.129.03/NVIDIA-Linux-x86_64-535.129.03.run"
        );
    }

    #[tokio::test]
    async fn test_existing_download_is_reused() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(installer_file_name("390.157")), b"payload").unwrap();
        let fetcher = FakeFetcher::new();
        let path = fetch_installer(&fetcher, BASE, "390.157", dir.path()).await.unwrap();
        assert!(path.ends_with("NVIDIA-Linux-x86_64-390.157.run"));
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_download_failure_maps_to_provision_error() {
        let dir = tempdir().unwrap();
        let fetcher = FakeFetcher::new().failing_download();
        let err = fetch_installer(&fetcher, BASE, "390.157", dir.path()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::DriverDownloadFailure(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_marks_executable_and_passes_flags() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let installer = dir.path().join(installer_file_name("390.157"));
        std::fs::write(&installer, b"payload").unwrap();

        let runner = ScriptedRunner::new();
        install_driver(&runner, &installer).await.unwrap();

        let mode = std::fs::metadata(&installer).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            runner.calls(),
            vec![format!("{} --silent --dkms", installer.display())]
        );
    }

    #[tokio::test]
    async fn test_installer_failure_carries_exit_code() {
        let dir = tempdir().unwrap();
        let installer = dir.path().join("NVIDIA-Linux-x86_64-1.0.run");
        std::fs::write(&installer, b"payload").unwrap();
        let runner = ScriptedRunner::new().respond(
            &format!("{} --silent --dkms", installer.display()),
            CommandOutcome::failed(1, "ERROR: Unable to build the kernel module"),
        );
        let err = install_driver(&runner, &installer).await.unwrap_err();
        assert!(matches!(err, ProvisionError::DriverInstallFailure { exit_code: Some(1) }));
    }

    #[tokio::test]
    async fn test_verification_failure() {
        let runner = ScriptedRunner::new().respond(
            "nvidia-smi",
            CommandOutcome::failed(9, "NVIDIA-SMI has failed because it couldn't communicate with the NVIDIA driver"),
        );
        let err = verify_driver(&runner).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(9));
    }
}
