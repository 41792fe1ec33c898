//! Boot image regeneration so the modprobe.d exclusion applies at early boot.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, ProvisionResult};
use crate::hardware::{Distribution, HostProfile};
use crate::runner::{args, CommandOutcome, CommandRunner};
use crate::setup::paths::HostPaths;

/// Regenerate the boot image for `profile`.
///
/// Returns the regeneration tool's outcome; a non-zero exit is not an `Err`,
/// the caller decides how loudly to report it.
pub async fn regenerate_boot_image(
    profile: &HostProfile,
    paths: &HostPaths,
    runner: &dyn CommandRunner,
) -> ProvisionResult<CommandOutcome> {
    let (program, arguments) = match profile.distribution {
        Distribution::Rhel | Distribution::Fedora => {
            backup_current_image(profile, paths);
            ("dracut", args(&["--force"]))
        }
        Distribution::Ubuntu => ("update-initramfs", args(&["-u"])),
        Distribution::Sles => ("mkinitrd", Vec::new()),
        Distribution::Unknown => {
            return Err(ProvisionError::UnsupportedDistribution {
                distribution: profile.distribution.to_string(),
            })
        }
    };

    tracing::info!(tool = program, "Regenerating boot image");
    let outcome = runner.run(program, &arguments).await?;
    if outcome.success() {
        tracing::info!("Boot image regenerated");
    }
    Ok(outcome)
}

/// Copy /boot/initramfs-<k>.img aside before dracut overwrites it.
/// An existing backup is kept so re-runs never replace the original image.
fn backup_current_image(profile: &HostProfile, paths: &HostPaths) {
    let Some(kernel) = profile.kernel_release.as_deref() else {
        tracing::warn!("Kernel release unknown; skipping boot image backup");
        return;
    };
    let current = paths.initramfs_image(kernel);
    let backup = paths.initramfs_backup(kernel);

    if backup.exists() {
        tracing::info!(backup = %backup.display(), "Boot image backup already present");
        return;
    }
    if !current.exists() {
        tracing::warn!(image = %current.display(), "No boot image to back up");
        return;
    }

    // Only a complete copy may appear under the backup name
    let staging = staging_path(&backup);
    let copied = fs::copy(&current, &staging).and_then(|bytes| fs::rename(&staging, &backup).map(|_| bytes));
    match copied {
        Ok(bytes) => tracing::info!(backup = %backup.display(), bytes, "Backed up boot image"),
        Err(e) => {
            let _ = fs::remove_file(&staging);
            tracing::warn!(backup = %backup.display(), "Boot image backup failed: {}", e);
        }
    }
}

/// `<backup>.tmp`
fn staging_path(backup: &Path) -> PathBuf {
    let mut name = backup.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    backup.with_file_name(name)
}
