//! Conflicting driver exclusion via a modprobe.d marker file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::ProvisionResult;

/// What `suppress_conflicting_driver` found or did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerStatus {
    /// Marker did not exist and was written
    Created,
    /// Marker already disables the driver; nothing written
    AlreadySatisfied { missing_modeset: bool },
    /// Marker exists but does not disable the driver; left untouched for review
    MissingDirective { content: String },
}

/// `blacklist <driver>`
pub fn module_directive(driver: &str) -> String {
    format!("blacklist {}", driver)
}

/// `options <driver> modeset=0`
pub fn modeset_directive(driver: &str) -> String {
    format!("options {} modeset=0", driver)
}

/// Keep `driver` from loading on the next boot.
///
/// An existing marker is never rewritten: it may carry operator edits.
pub fn suppress_conflicting_driver(marker_path: &Path, driver: &str) -> ProvisionResult<MarkerStatus> {
    let module_line = module_directive(driver);
    let modeset_line = modeset_directive(driver);

    if marker_path.exists() {
        let content = fs::read_to_string(marker_path)?;
        let has = |directive: &str| {
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.starts_with('#'))
                .any(|l| l == directive)
        };

        if has(&module_line) {
            let missing_modeset = !has(&modeset_line);
            tracing::info!(path = %marker_path.display(), "{} already disabled", driver);
            if missing_modeset {
                tracing::warn!(
                    path = %marker_path.display(),
                    "Marker lacks '{}'; add it manually if the console misbehaves",
                    modeset_line
                );
            }
            return Ok(MarkerStatus::AlreadySatisfied { missing_modeset });
        }

        tracing::warn!(
            path = %marker_path.display(),
            "Marker exists but does not contain '{}'. Review it manually. Current content:\n{}",
            module_line,
            content
        );
        return Ok(MarkerStatus::MissingDirective { content });
    }

    if let Some(parent) = marker_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(marker_path)?;
    file.write_all(format!("{}\n{}\n", module_line, modeset_line).as_bytes())?;
    file.sync_all()?;

    tracing::info!(path = %marker_path.display(), "Disabled {} for future boots", driver);
    Ok(MarkerStatus::Created)
}
