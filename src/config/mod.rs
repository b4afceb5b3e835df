//! Configuration loading
//!
//! Reads a JSON5 configuration file, fills unset fields with defaults and
//! applies environment overrides.

pub mod types;

pub use types::{
    ChannelConfig, Config, LogFormat, LoggingConfig, MediaConfig, NegotiationConfig,
    SessionConfig, WatermarkConfig,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "RELAYMARK_CONFIG_PATH";

/// Environment variable overriding `logging.level`.
pub const LOG_LEVEL_ENV: &str = "RELAYMARK_LOG";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Resolve the configuration file path.
///
/// An explicit path wins, then `RELAYMARK_CONFIG_PATH`, then
/// `<config_dir>/relaymark/config.json5`.
pub fn get_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relaymark")
        .join("config.json5")
}

/// Load, override and validate the configuration at `path`.
///
/// A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        parse_config(&raw).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Parse a JSON5 document into a [`Config`].
pub fn parse_config(raw: &str) -> Result<Config, String> {
    if raw.trim().is_empty() {
        return Ok(Config::default());
    }
    json5::from_str(raw).map_err(|e| e.to_string())
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(level) = lookup(LOG_LEVEL_ENV).filter(|v| !v.trim().is_empty()) {
        config.logging.level = level;
    }
}
