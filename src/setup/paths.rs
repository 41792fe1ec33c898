//! Path utilities for host locations
//!
//! Every host file gpuprov reads or writes is resolved through [`HostPaths`],
//! rooted at `/` in production and at a temp directory in tests.

use std::path::{Path, PathBuf};

/// Fixed locations of the files the probes and mitigations touch
#[derive(Debug, Clone)]
pub struct HostPaths {
    root: PathBuf,
}

impl HostPaths {
    /// Paths on the running host
    pub fn system() -> Self {
        Self::under("/")
    }

    /// Paths below an alternate root (fixtures, chroots)
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an absolute host path below the root
    pub fn resolve(&self, absolute: impl AsRef<Path>) -> PathBuf {
        let absolute = absolute.as_ref();
        let relative = absolute.strip_prefix("/").unwrap_or(absolute);
        self.root.join(relative)
    }

    /// RHEL-family marker: /etc/redhat-release
    pub fn redhat_release(&self) -> PathBuf {
        self.resolve("/etc/redhat-release")
    }

    /// SUSE marker: /etc/SuSE-release
    pub fn suse_release(&self) -> PathBuf {
        self.resolve("/etc/SuSE-release")
    }

    /// Generic release info: /etc/os-release
    pub fn os_release(&self) -> PathBuf {
        self.resolve("/etc/os-release")
    }

    /// Running kernel release: /proc/sys/kernel/osrelease
    pub fn kernel_osrelease(&self) -> PathBuf {
        self.resolve("/proc/sys/kernel/osrelease")
    }

    pub fn boot_dir(&self) -> PathBuf {
        self.resolve("/boot")
    }

    /// Current initramfs for a kernel: /boot/initramfs-<k>.img
    pub fn initramfs_image(&self, kernel_release: &str) -> PathBuf {
        self.boot_dir().join(format!("initramfs-{}.img", kernel_release))
    }

    /// Pre-regeneration backup: /boot/initramfs-<k>-nouveau.img
    pub fn initramfs_backup(&self, kernel_release: &str) -> PathBuf {
        self.boot_dir()
            .join(format!("initramfs-{}-{}.img", kernel_release, BACKUP_TAG))
    }
}

/// Suffix tagging the boot image saved before the conflicting driver was excluded
pub const BACKUP_TAG: &str = "nouveau";

/// Default exclusion marker location
pub const DEFAULT_MARKER_FILE: &str = "/etc/modprobe.d/blacklist-nouveau.conf";

/// Default log file location
pub const DEFAULT_LOG_FILE: &str = "/var/log/gpuprov.log";

/// Default directory for downloaded installers: ~/.cache/gpuprov
pub fn default_download_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("gpuprov"),
        None => PathBuf::from("/var/tmp/gpuprov"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_under_fixture_root() {
        let paths = HostPaths::under("/tmp/fixture");
        assert_eq!(paths.os_release(), PathBuf::from("/tmp/fixture/etc/os-release"));
        assert_eq!(
            paths.resolve(DEFAULT_MARKER_FILE),
            PathBuf::from("/tmp/fixture/etc/modprobe.d/blacklist-nouveau.conf")
        );
    }

    #[test]
    fn test_system_paths_are_unchanged() {
        let paths = HostPaths::system();
        assert_eq!(paths.redhat_release(), PathBuf::from("/etc/redhat-release"));
    }

    #[test]
    fn test_initramfs_backup_name() {
        let paths = HostPaths::system();
        assert_eq!(
            paths.initramfs_backup("3.10.0-1160.el7.x86_64"),
            PathBuf::from("/boot/initramfs-3.10.0-1160.el7.x86_64-nouveau.img")
        );
    }
}
