//! Bootstrap configuration loading
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `CURATOR_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/curator/config.toml` on Linux)
//! 4. Compiled defaults (fallback)
//!
//! A missing or unreadable file is not fatal: the service logs a warning and
//! starts with defaults.

use crate::framing::DEFAULT_MAX_MESSAGE_SIZE;
use crate::id_claim::DEFAULT_MAX_ATTEMPTS;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CURATOR_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub id_claim: IdClaimConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            worker: WorkerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            id_claim: IdClaimConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Scoring worker connection settings (shared by worker and dispatcher)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Address the worker listens on and the dispatcher connects to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Largest accepted frame payload in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u64,

    /// Input dimension of classifier heads (feature vector length)
    #[serde(default = "default_feature_dim")]
    pub feature_dim: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_message_size: default_max_message_size(),
            feature_dim: default_feature_dim(),
        }
    }
}

/// Dispatcher-side settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Optional caller-side reply timeout; `None` waits until reply or connection loss
    #[serde(default)]
    pub reply_timeout_ms: Option<u64>,
}

impl DispatcherConfig {
    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }
}

/// ID claim protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdClaimConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for IdClaimConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_database_path() -> PathBuf {
    default_data_dir().join("curator.db")
}

fn default_bind_addr() -> String {
    "127.0.0.1:8001".to_string()
}

fn default_max_message_size() -> u64 {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_feature_dim() -> usize {
    768
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OS-dependent data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("curator"))
        .unwrap_or_else(|| PathBuf::from("./curator_data"))
}

/// Platform config file location, if the platform has a config directory
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("curator").join("config.toml"))
}

/// Parse a TOML config file
pub fn read_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write a TOML config file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Locate the config file using the priority order above
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path().filter(|p| p.exists())
}

/// Load configuration, degrading to defaults when no usable file exists
pub fn load_config(cli_arg: Option<&Path>) -> TomlConfig {
    let Some(path) = resolve_config_path(cli_arg) else {
        info!("No config file found, using compiled defaults");
        return TomlConfig::default();
    };

    match read_toml_config(&path) {
        Ok(config) => {
            info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Could not load config {} ({}), using compiled defaults", path.display(), e);
            TomlConfig::default()
        }
    }
}
