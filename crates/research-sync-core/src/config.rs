//! Client configuration
//!
//! Loaded from `$RESEARCH_SYNC_CONFIG` or `~/.research-sync/config.yaml`:
//! ```yaml
//! api_base: "http://localhost:8000/v1"
//! poll_interval_ms: 2000
//! event_capacity: 256
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use crate::error::{Result, SyncError};
use crate::routes::ApiRoutes;

pub const CONFIG_ENV: &str = "RESEARCH_SYNC_CONFIG";
pub const API_BASE_ENV: &str = "RESEARCH_API_BASE";

const DEFAULT_API_BASE: &str = "http://localhost:8000/v1";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Sync client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// API base URL; the push endpoint derives its scheme from it
    pub api_base: String,
    /// Fallback polling cadence
    pub poll_interval_ms: u64,
    /// Per-session event buffer for subscribers
    pub event_capacity: usize,
    /// Optional HTTP request timeout; transport defaults when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            request_timeout_ms: None,
        }
    }
}

impl SyncConfig {
    /// Default config location
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .map(|h| h.join(".research-sync").join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from(".research-sync/config.yaml"))
    }

    /// Load from the default location, then apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::load_from(&Self::default_path());
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            config.api_base = base;
        }
        config
    }

    /// Load from a file, falling back to defaults when it is missing or invalid
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            info!(path = ?path, "No sync config found, using defaults");
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str(&content) {
                Ok(config) => {
                    info!(path = ?path, "Sync config loaded");
                    config
                }
                Err(e) => {
                    error!(error = %e, path = ?path, "Failed to parse sync config");
                    Self::default()
                }
            },
            Err(e) => {
                error!(error = %e, path = ?path, "Failed to read sync config");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content =
            serde_yaml::to_string(self).map_err(|e| SyncError::Config(e.to_string()))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| SyncError::Config(e.to_string()))?;
        }
        fs::write(path, content).map_err(|e| SyncError::Config(e.to_string()))?;
        info!(path = ?path, "Sync config saved");
        Ok(())
    }

    pub fn routes(&self) -> Result<ApiRoutes> {
        ApiRoutes::new(&self.api_base)
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = SyncConfig::load_from(&dir.path().join("nope.yaml"));
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "api_base: \"https://research.example.com\"\npoll_interval_ms: 500\n")
            .unwrap();

        let config = SyncConfig::load_from(&path);
        assert_eq!(config.api_base, "https://research.example.com");
        assert_eq!(config.poll_interval_ms, 500);
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.request_timeout(), None);
    }

    #[test]
    fn test_invalid_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "poll_interval_ms: [not, a, number]").unwrap();

        assert_eq!(SyncConfig::load_from(&path), SyncConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = SyncConfig {
            request_timeout_ms: Some(10_000),
            ..SyncConfig::default()
        };
        config.save_to(&path).unwrap();

        let loaded = SyncConfig::load_from(&path);
        assert_eq!(loaded, config);
        assert_eq!(loaded.request_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_zero_interval_is_bumped() {
        let config = SyncConfig {
            poll_interval_ms: 0,
            ..SyncConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
