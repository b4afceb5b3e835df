//! Typed configuration structures
//!
//! Provides strongly-typed access to configuration values with validation
//! and default values.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Destination channel and link-issuing agent
    pub channel: ChannelConfig,

    /// Collection window and trigger detection
    pub session: SessionConfig,

    /// Link-issuing agent handshake
    pub negotiation: NegotiationConfig,

    /// Working directory and external tools
    pub media: MediaConfig,

    /// Watermark appearance
    pub watermark: WatermarkConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.pollIntervalSecs must be positive".to_string(),
            ));
        }
        if self.session.collection_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.collectionWindowSecs must be positive".to_string(),
            ));
        }
        if self.session.trigger_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.triggerTimeoutSecs must be positive".to_string(),
            ));
        }
        if self.negotiation.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "negotiation.pollIntervalSecs must be positive".to_string(),
            ));
        }
        if self.negotiation.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "negotiation.maxAttempts must be positive".to_string(),
            ));
        }
        let scale = self.watermark.scale_fraction;
        if !(scale > 0.0 && scale <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "watermark.scaleFraction must be in (0, 1], got {}",
                scale
            )));
        }
        if !(1..=100).contains(&self.watermark.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "watermark.jpegQuality must be in 1..=100, got {}",
                self.watermark.jpeg_quality
            )));
        }
        if self.watermark.text.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "watermark.text must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Destination channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Channel watched for triggers and used for republishing
    pub target_channel_id: Option<i64>,

    /// Handle of the link-issuing agent
    pub link_agent: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            target_channel_id: None,
            link_agent: "@not_those_videos_free_bot".to_string(),
        }
    }
}

/// Collection session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub poll_interval_secs: u64,
    pub collection_window_secs: u64,
    /// Delay before enumerating a media group
    pub group_settle_millis: u64,
    /// How many recent channel messages to scan for group members
    pub group_scan_limit: usize,
    /// Bound on resolving the delivery agent and sending it the start command
    pub trigger_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            collection_window_secs: 30,
            group_settle_millis: 1500,
            group_scan_limit: 100,
            trigger_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn collection_window(&self) -> Duration {
        Duration::from_secs(self.collection_window_secs)
    }

    pub fn group_settle(&self) -> Duration {
        Duration::from_millis(self.group_settle_millis)
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_secs(self.trigger_timeout_secs)
    }
}

/// Handshake polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NegotiationConfig {
    pub poll_interval_secs: u64,
    /// Poll ceiling applied to each phase independently
    pub max_attempts: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            max_attempts: 30,
        }
    }
}

impl NegotiationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Media working directory and tool locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaConfig {
    pub work_dir: PathBuf,
    pub process_timeout_secs: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("media_temp"),
            process_timeout_secs: 600,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl MediaConfig {
    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }
}

/// Watermark configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatermarkConfig {
    pub text: String,
    /// Font size as a fraction of the smaller media dimension
    pub scale_fraction: f64,
    pub min_font_px: u32,
    pub margin: u32,
    /// Explicit TrueType font; system fonts are searched when unset
    pub font_file: Option<PathBuf>,
    pub jpeg_quality: u8,
    /// Fail the item instead of publishing it unwatermarked
    pub require_watermark: bool,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            text: "TG - @That_stuff".to_string(),
            scale_fraction: 0.05,
            min_font_px: 8,
            margin: 10,
            font_file: None,
            jpeg_quality: 95,
            require_watermark: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// EnvFilter directive
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
