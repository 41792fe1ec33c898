//! Host Identification
//!
//! Determines the distribution and version by priority:
//! 1. RHEL-family marker (/etc/redhat-release)
//! 2. SUSE marker (/etc/SuSE-release)
//! 3. Generic release info (/etc/os-release)
//! 4. Unknown

use serde::Serialize;
use std::fs;

use crate::setup::paths::HostPaths;

/// Distribution family, which selects package and boot-image commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Rhel,
    Ubuntu,
    Sles,
    Fedora,
    Unknown,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Rhel => "rhel",
            Distribution::Ubuntu => "ubuntu",
            Distribution::Sles => "sles",
            Distribution::Fedora => "fedora",
            Distribution::Unknown => "unknown",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Distribution::Unknown)
    }

    /// Distributions that boot from a dracut-built /boot/initramfs-<k>.img
    pub fn is_rhel_family(&self) -> bool {
        matches!(self, Distribution::Rhel | Distribution::Fedora)
    }

    fn from_os_release_id(id: &str) -> Self {
        match id.to_ascii_lowercase().as_str() {
            "rhel" | "centos" | "rocky" | "almalinux" | "ol" => Distribution::Rhel,
            "ubuntu" => Distribution::Ubuntu,
            "sles" | "sled" => Distribution::Sles,
            other if other.starts_with("opensuse") => Distribution::Sles,
            "fedora" => Distribution::Fedora,
            _ => Distribution::Unknown,
        }
    }
}

impl std::fmt::Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the host for this run. Built once, then passed by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostProfile {
    pub distribution: Distribution,
    pub version_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel_release: Option<String>,
}

impl HostProfile {
    pub fn unknown() -> Self {
        HostProfile {
            distribution: Distribution::Unknown,
            version_id: String::new(),
            kernel_release: None,
        }
    }

    /// Leading numeric component of the version ("7.9.2009" -> 7)
    pub fn major_version(&self) -> Option<u32> {
        self.version_id.split('.').next()?.trim().parse().ok()
    }
}

/// Identify the host. Never fails: `Unknown` is a valid answer.
pub fn identify_host(paths: &HostPaths) -> HostProfile {
    let kernel_release = fs::read_to_string(paths.kernel_osrelease())
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let (distribution, version_id) = if let Ok(text) = fs::read_to_string(paths.redhat_release()) {
        parse_redhat_release(&text)
    } else if let Ok(text) = fs::read_to_string(paths.suse_release()) {
        (Distribution::Sles, parse_suse_release(&text))
    } else if let Ok(text) = fs::read_to_string(paths.os_release()) {
        parse_os_release(&text)
    } else {
        (Distribution::Unknown, String::new())
    };

    let profile = HostProfile {
        distribution,
        version_id,
        kernel_release,
    };
    tracing::info!(
        distribution = %profile.distribution,
        version = %profile.version_id,
        kernel = profile.kernel_release.as_deref().unwrap_or("unknown"),
        "Identified host"
    );
    profile
}

/// "CentOS Linux release 7.9.2009 (Core)" -> (Rhel, "7.9.2009")
fn parse_redhat_release(text: &str) -> (Distribution, String) {
    let distribution = if text.to_ascii_lowercase().contains("fedora") {
        Distribution::Fedora
    } else {
        Distribution::Rhel
    };
    let mut tokens = text.split_whitespace();
    let version = tokens
        .by_ref()
        .find(|t| t.eq_ignore_ascii_case("release"))
        .and_then(|_| tokens.next())
        .unwrap_or_default()
        .to_string();
    (distribution, version)
}

/// VERSION = 12 / PATCHLEVEL = 3 -> "12.3"
fn parse_suse_release(text: &str) -> String {
    let mut version = None;
    let mut patchlevel = None;
    for line in text.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "VERSION" => version = Some(value.trim().to_string()),
                "PATCHLEVEL" => patchlevel = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    match (version, patchlevel) {
        (Some(v), Some(p)) if !p.is_empty() => format!("{}.{}", v, p),
        (Some(v), _) => v,
        (None, _) => String::new(),
    }
}

fn parse_os_release(text: &str) -> (Distribution, String) {
    let mut id = String::new();
    let mut version_id = String::new();
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'').to_string();
            match key.trim() {
                "ID" => id = value,
                "VERSION_ID" => version_id = value,
                _ => {}
            }
        }
    }
    (Distribution::from_os_release_id(&id), version_id)
}
