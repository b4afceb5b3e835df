//! Media pipeline module
//!
//! Turns a media reference delivered by the agent into a publishable file:
//!
//! - **MediaInspector**: stream dimensions and duration via ffprobe
//! - **WatermarkEngine**: sweeping overlay for video, dual stamps for images
//! - **MediaAcquisition**: download, classification, animated-image
//!   conversion, watermarking and thumbnail extraction
//!
//! External tools run through [`ProcessRunner`] so every invocation shares the
//! same timeout and success contract ([`RenderResult`]).

pub mod acquire;
pub mod probe;
pub mod process;
pub mod random;
pub mod watermark;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::transport::InboundMessage;

// Re-export commonly used types
pub use acquire::{classify, Classification, MediaAcquisition, ANIMATED_EXTENSIONS, VIDEO_EXTENSIONS};
pub use probe::{MediaInfo, MediaInspector};
pub use process::{ProcessOutput, ProcessRunner, RenderResult, TokioProcessRunner};
pub use random::{RandomSource, ScriptedRandom, SeededRandom};
pub use watermark::{WatermarkEngine, WatermarkSpec};

/// Errors that can occur while acquiring media.
#[derive(Error, Debug, Clone)]
pub enum MediaError {
    #[error("download failed: {0}")]
    Download(String),

    #[error("downloaded file missing: {0}")]
    Missing(PathBuf),

    #[error("downloaded file is empty: {0}")]
    EmptyFile(PathBuf),

    #[error("animated image conversion failed: {0}")]
    Conversion(String),

    #[error("watermarked output missing: {0}")]
    WatermarkMissing(PathBuf),

    #[error("watermark could not be applied to {0}")]
    WatermarkRequired(PathBuf),

    #[error("probe failed: {0}")]
    Probe(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Kind of a processed item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// A media reply collected during a session, with its arrival index.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRef {
    pub message: InboundMessage,
    pub order: usize,
}

/// A watermarked file ready for upload.
///
/// The caller owns the files and must call [`ProcessedMedia::dispose`] once
/// the upload attempt is over.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedMedia {
    pub file_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub kind: MediaKind,
    /// Pixel dimensions, when the probe reported them
    pub dimensions: Option<(u32, u32)>,
    pub duration_secs: Option<f64>,
    /// Whether the watermark was actually applied
    pub watermarked: bool,
    /// Per-item working directory holding every file above
    pub work_dir: PathBuf,
}

impl ProcessedMedia {
    /// Delete the item's files, logging failures.
    pub async fn dispose(self) {
        for path in std::iter::once(&self.file_path).chain(self.thumbnail_path.iter()) {
            remove_file_quietly(path).await;
        }
        match tokio::fs::remove_dir_all(&self.work_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.work_dir.display(), error = %e, "failed to remove item directory")
            }
        }
    }
}

async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file"),
    }
}

/// Turns one collected media reply into a publishable file.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Download, transform and watermark `item`.
    ///
    /// An error means "skip this item"; it never aborts the session.
    async fn process(&self, item: &MediaRef) -> Result<ProcessedMedia, MediaError>;
}
