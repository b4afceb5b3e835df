//! Watermark engine
//!
//! Burns the attribution text into media. Video gets a single stamp sweeping
//! across the frame over playback time; still images get two static stamps
//! placed apart from each other.
//!
//! Both transforms take an input path and an output path and return the path
//! to publish: the output on success, the untouched input when rendering
//! fails. The input file is never modified.

pub mod still;
pub mod video;

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::probe::MediaInspector;
use super::process::ProcessRunner;
use super::random::{RandomSource, SeededRandom};
use crate::config::{Config, WatermarkConfig};

pub use self::still::{choose_placements, Placement, MAX_PLACEMENT_ATTEMPTS};
pub use self::video::{drawtext_filter, escape_drawtext, Direction, Motion};

/// System fonts tried in order when no font file is configured.
pub const FONT_FILE_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Immutable watermark settings
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkSpec {
    pub text: String,
    pub scale_fraction: f64,
    pub min_font_px: u32,
    pub margin: u32,
    pub jpeg_quality: u8,
}

impl WatermarkSpec {
    pub fn from_config(config: &WatermarkConfig) -> Self {
        Self {
            text: config.text.clone(),
            scale_fraction: config.scale_fraction,
            min_font_px: config.min_font_px,
            margin: config.margin,
            jpeg_quality: config.jpeg_quality,
        }
    }

    /// Font size for media of `width` x `height`.
    pub fn font_size(&self, width: u32, height: u32) -> u32 {
        font_size(width.min(height), self.scale_fraction, self.min_font_px)
    }
}

impl Default for WatermarkSpec {
    fn default() -> Self {
        Self::from_config(&WatermarkConfig::default())
    }
}

/// `max(min_px, round(min_dimension * scale))`
pub fn font_size(min_dimension: u32, scale: f64, min_px: u32) -> u32 {
    let scaled = (f64::from(min_dimension) * scale).round();
    let scaled = if scaled.is_finite() && scaled > 0.0 {
        scaled.min(f64::from(u32::MAX)) as u32
    } else {
        0
    };
    scaled.max(min_px)
}

/// Pick the font file: the configured one if it exists, otherwise the first
/// installed system candidate.
pub fn discover_font(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured watermark font not found, searching system fonts");
    }
    FONT_FILE_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
}

/// Applies watermarks to media files
pub struct WatermarkEngine {
    spec: WatermarkSpec,
    font: Option<PathBuf>,
    inspector: MediaInspector,
    runner: Arc<dyn ProcessRunner>,
    ffmpeg_path: String,
    timeout: Duration,
    rng: Mutex<Box<dyn RandomSource>>,
}

impl WatermarkEngine {
    pub fn new(
        spec: WatermarkSpec,
        font: Option<PathBuf>,
        inspector: MediaInspector,
        runner: Arc<dyn ProcessRunner>,
        ffmpeg_path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            spec,
            font,
            inspector,
            runner,
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
            rng: Mutex::new(Box::new(SeededRandom::from_entropy())),
        }
    }

    /// Engine wired to the configured tools, font and watermark settings.
    pub fn from_config(config: &Config, runner: Arc<dyn ProcessRunner>) -> Self {
        let timeout = config.media.process_timeout();
        let inspector = MediaInspector::new(runner.clone(), config.media.ffprobe_path.clone(), timeout);
        let font = discover_font(config.watermark.font_file.as_deref());
        match &font {
            Some(path) => tracing::debug!(font = %path.display(), "watermark font selected"),
            None => tracing::warn!("no watermark font found; images will be published unwatermarked"),
        }
        Self::new(
            WatermarkSpec::from_config(&config.watermark),
            font,
            inspector,
            runner,
            config.media.ffmpeg_path.clone(),
            timeout,
        )
    }

    /// Replace the random source, e.g. with a seeded one.
    pub fn with_random_source(self, rng: Box<dyn RandomSource>) -> Self {
        Self {
            rng: Mutex::new(rng),
            ..self
        }
    }

    pub fn inspector(&self) -> &MediaInspector {
        &self.inspector
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut dyn RandomSource) -> T) -> T {
        let mut guard = self.rng.lock();
        f(guard.as_mut())
    }
}

/// Remove a stale file at `path`, ignoring absence.
async fn remove_stale(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "failed to remove stale output"),
    }
}
