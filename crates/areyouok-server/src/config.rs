//! Server configuration, parsed from a TOML file plus environment overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use areyouok_core::HeartbeatConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// General server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Heartbeat thresholds for deadline warnings
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Data directory (SQLite DB)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Check interval in seconds (default: 1 hour)
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            check_interval_secs: default_check_interval(),
            log_level: default_log_level(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_check_interval() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `AREYOUOK_DATA_DIR`
    /// - `AREYOUOK_CHECK_INTERVAL`
    /// - `AREYOUOK_LOG_LEVEL`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AREYOUOK_DATA_DIR") {
            self.server.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AREYOUOK_CHECK_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                self.server.check_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("AREYOUOK_LOG_LEVEL") {
            self.server.log_level = v;
        }
    }

    /// Path of the registry database inside the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.server.data_dir.join("areyouok.db")
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.server.check_interval_secs >= 60,
            "server.check_interval_secs must be >= 60"
        );

        self.heartbeat
            .validate()
            .context("Invalid [heartbeat] section")?;

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
