//! Runtime configuration
//!
//! Defaults, then an optional JSON file, then environment overrides:
//! - `GPUPROV_CONFIG`          path of the JSON file (default /etc/gpuprov.json)
//! - `GPUPROV_DRIVER_VERSION`  pinned driver version; empty means auto-resolve
//! - `GPUPROV_LOG_FILE`        log file path

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProvisionError, ProvisionResult};
use crate::setup::paths::{default_download_dir, DEFAULT_LOG_FILE, DEFAULT_MARKER_FILE};

const DEFAULT_CONFIG_FILE: &str = "/etc/gpuprov.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pin for hardware the newest release no longer supports
    pub pinned_version: Option<String>,
    pub version_feed_url: String,
    pub version_label: String,
    pub download_base_url: String,
    pub download_dir: PathBuf,
    pub log_file: PathBuf,
    pub marker_file: PathBuf,
    pub prompt_timeout_secs: u64,
    pub vendor: String,
    pub conflicting_driver: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pinned_version: None,
            version_feed_url: "https://www.nvidia.com/object/unix.html".to_string(),
            version_label: "Latest Production Branch Version:".to_string(),
            download_base_url: "https://us.download.nvidia.com/XFree86/Linux-x86_64".to_string(),
            download_dir: default_download_dir(),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            marker_file: PathBuf::from(DEFAULT_MARKER_FILE),
            prompt_timeout_secs: 10,
            vendor: "nvidia".to_string(),
            conflicting_driver: "nouveau".to_string(),
        }
    }
}

impl Config {
    /// Load from the config file (if any) and the environment
    pub fn load() -> ProvisionResult<Self> {
        let explicit = std::env::var("GPUPROV_CONFIG").ok().filter(|p| !p.trim().is_empty());
        let mut config = match &explicit {
            Some(path) => Self::from_file(Path::new(path))?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?,
            None => Config::default(),
        };

        if let Ok(version) = std::env::var("GPUPROV_DRIVER_VERSION") {
            config.pinned_version = Some(version);
        }
        if let Ok(log_file) = std::env::var("GPUPROV_LOG_FILE") {
            if !log_file.trim().is_empty() {
                config.log_file = PathBuf::from(log_file);
            }
        }
        Ok(config.normalized())
    }

    pub fn from_file(path: &Path) -> ProvisionResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProvisionError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&content)
            .map_err(|e| ProvisionError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Config>(content).map(Config::normalized)
    }

    /// Blank pinned versions mean "resolve automatically"
    fn normalized(mut self) -> Self {
        self.pinned_version = self
            .pinned_version
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        self
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_secs(self.prompt_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.pinned_version, None);
        assert_eq!(config.marker_file, PathBuf::from("/etc/modprobe.d/blacklist-nouveau.conf"));
        assert_eq!(config.prompt_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Config::from_json_str(r#"{"pinned_version": "390.157", "prompt_timeout_secs": 3}"#).unwrap();
        assert_eq!(config.pinned_version.as_deref(), Some("390.157"));
        assert_eq!(config.prompt_timeout_secs, 3);
        assert_eq!(config.vendor, "nvidia");
    }

    #[test]
    fn test_blank_pinned_version_is_unset() {
        let config = Config::from_json_str(r#"{"pinned_version": "  "}"#).unwrap();
        assert_eq!(config.pinned_version, None);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gpuprov.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ProvisionError::Config(_)));
    }
}
