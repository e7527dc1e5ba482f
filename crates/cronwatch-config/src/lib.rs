use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use serde::Deserialize;
use thiserror::Error;

use cronwatch_types::AlertPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
    #[error("UTC offset out of range: {0} minutes")]
    InvalidOffset(i32),
}

/// Where heartbeats and job definitions are persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. Defaults to `~/.cronwatch/cronwatch.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Missed-execution monitoring settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Whether repeated misses in one period produce repeated alerts.
    #[serde(default)]
    pub alert_policy: AlertPolicy,
    /// Offset of the calendar used for day, week and month boundaries.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_interval_secs() -> u64 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            alert_policy: AlertPolicy::default(),
            utc_offset_minutes: 0,
        }
    }
}

impl MonitorConfig {
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or(ConfigError::InvalidOffset(self.utc_offset_minutes))
    }
}

/// Top-level cronwatch configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CronwatchConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl CronwatchConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("cronwatch.db")),
        }
    }
}

/// Resolve the cronwatch config directory (~/.cronwatch/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".cronwatch"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.cronwatch/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<CronwatchConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<CronwatchConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(CronwatchConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: CronwatchConfig = json5::from_str(&content)?;
    Ok(config)
}
