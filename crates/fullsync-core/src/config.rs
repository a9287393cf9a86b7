//! Configuration management for fullsync.
//!
//! This module provides configuration loading, saving, and defaults.
//! Configuration is stored in TOML format in a platform-appropriate location.

use crate::error::{Result, SyncError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default number of objects indexed per step
pub const DEFAULT_PER_PAGE: usize = 350;

/// Main configuration structure for fullsync.
///
/// ## Example Configuration File (fullsync.toml)
///
/// ```toml
/// [general]
/// log_level = "warn"
///
/// [sync]
/// per_page = 350
/// state_dir = "/var/lib/fullsync"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Sync run settings
    pub sync: SyncConfig,
}

/// General configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log filter used when no verbosity flag is given
    /// (trace, debug, info, warn, error, or an `EnvFilter` directive)
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            log_level: "warn".to_string(),
        }
    }
}

/// Sync run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Objects fetched and indexed per step
    pub per_page: usize,

    /// Checkpoint directory (None = default location)
    pub state_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            per_page: DEFAULT_PER_PAGE,
            state_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default config if no config file exists.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Config::default());
        }

        info!(path = %path.display(), "Loading configuration");
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(|e| SyncError::ConfigError {
            reason: format!("Failed to parse config: {}", e),
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Saving configuration");
        let contents = toml::to_string_pretty(self).map_err(|e| SyncError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the run-state machine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.sync.per_page == 0 {
            return Err(SyncError::ConfigError {
                reason: "sync.per_page must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "fullsync").ok_or_else(|| SyncError::ConfigError {
            reason: "Could not determine config directory".to_string(),
        })?;

        Ok(dirs.config_dir().join("fullsync.toml"))
    }

    /// Get the default data directory path.
    pub fn default_data_dir() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "fullsync").ok_or_else(|| SyncError::ConfigError {
            reason: "Could not determine data directory".to_string(),
        })?;

        Ok(dirs.data_dir().to_path_buf())
    }

    /// Get the checkpoint directory (from config or default).
    pub fn state_dir(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.sync.state_dir {
            Ok(path.clone())
        } else {
            Self::default_data_dir()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sync.per_page, DEFAULT_PER_PAGE);
        assert_eq!(config.general.log_level, "warn");
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let mut config = Config::default();
        config.sync.per_page = 50;
        config.sync.state_dir = Some(temp_dir.path().join("state"));

        config.save_to(&config_path).unwrap();
        let loaded = Config::load_from(&config_path).unwrap();

        assert_eq!(loaded.sync.per_page, 50);
        assert_eq!(loaded.state_dir().unwrap(), temp_dir.path().join("state"));
    }

    #[test]
    fn test_load_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.sync.per_page, DEFAULT_PER_PAGE);
    }

    #[test]
    fn test_partial_file_and_unknown_sections() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        fs::write(&config_path, "[sync]\nper_page = 10\n\n[local]\nindex_prefix = \"x\"\n").unwrap();

        let config = Config::load_from(&config_path).unwrap();
        assert_eq!(config.sync.per_page, 10);
        assert_eq!(config.general.log_level, "warn");
    }

    #[test]
    fn test_zero_per_page_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("zero.toml");
        fs::write(&config_path, "[sync]\nper_page = 0\n").unwrap();

        let err = Config::load_from(&config_path).unwrap_err();
        assert!(matches!(err, SyncError::ConfigError { .. }));
    }
}
