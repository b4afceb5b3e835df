//! Media acquisition.
//!
//! Downloads a collected reply into its own working directory, classifies
//! it, converts animated images to video and runs the watermark engine.
//! Working directories are named after the source chat and message ID so
//! items of one batch never collide.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::process::{is_nonempty_file, ProcessRunner, RenderResult};
use super::watermark::WatermarkEngine;
use super::{MediaError, MediaKind, MediaProcessor, MediaRef, ProcessedMedia};
use crate::config::Config;
use crate::transport::{DynTransport, MediaAttachment};

/// Extensions treated as animated images that must become video first.
pub const ANIMATED_EXTENSIONS: &[&str] = &["gif"];

/// Container extensions treated as video.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi"];

/// Seek position of the extracted thumbnail frame.
pub const THUMBNAIL_OFFSET: &str = "00:00:01.000";

/// How a downloaded file is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Image,
    Video,
    /// Needs conversion to a video container before watermarking
    AnimatedImage,
}

/// Classify a downloaded file from its extension and the transport's
/// attribute metadata.
pub fn classify(path: &Path, attachment: Option<&MediaAttachment>) -> Classification {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .or_else(|| attachment.and_then(MediaAttachment::extension));
    let ext = extension.as_deref().unwrap_or_default();

    if ANIMATED_EXTENSIONS.contains(&ext) {
        Classification::AnimatedImage
    } else if attachment.is_some_and(|a| a.video_attribute) || VIDEO_EXTENSIONS.contains(&ext) {
        Classification::Video
    } else {
        Classification::Image
    }
}

/// Most recently modified entry of `dir`.
async fn newest_entry(dir: &Path) -> Result<Option<PathBuf>, MediaError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| MediaError::Io(format!("read {}: {e}", dir.display())))?;

    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MediaError::Io(format!("read {}: {e}", dir.display())))?
    {
        let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(best, _)| modified > *best) {
            newest = Some((modified, entry.path()));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string())
}

/// `<dir>/wm_<name>`
fn watermarked_path(source: &Path, dir: &Path) -> PathBuf {
    dir.join(format!("wm_{}", file_name(source)))
}

/// `<stem>_thumb.jpg` next to the video
fn thumbnail_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".to_string());
    video.with_file_name(format!("{stem}_thumb.jpg"))
}

/// Downloads and prepares collected media
pub struct MediaAcquisition {
    transport: DynTransport,
    engine: Arc<WatermarkEngine>,
    runner: Arc<dyn ProcessRunner>,
    ffmpeg_path: String,
    timeout: Duration,
    work_dir: PathBuf,
    require_watermark: bool,
}

impl MediaAcquisition {
    pub fn new(
        transport: DynTransport,
        engine: Arc<WatermarkEngine>,
        runner: Arc<dyn ProcessRunner>,
        ffmpeg_path: impl Into<String>,
        timeout: Duration,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transport,
            engine,
            runner,
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
            work_dir: work_dir.into(),
            require_watermark: false,
        }
    }

    /// Acquisition wired from configuration, sharing `engine`.
    pub fn from_config(
        config: &Config,
        transport: DynTransport,
        engine: Arc<WatermarkEngine>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self::new(
            transport,
            engine,
            runner,
            config.media.ffmpeg_path.clone(),
            config.media.process_timeout(),
            config.media.work_dir.clone(),
        )
        .with_require_watermark(config.watermark.require_watermark)
    }

    /// Fail items whose watermark could not be rendered instead of
    /// publishing them unmodified.
    pub fn with_require_watermark(mut self, require: bool) -> Self {
        self.require_watermark = require;
        self
    }

    /// Working directory of one item.
    pub fn item_dir(&self, item: &MediaRef) -> PathBuf {
        self.work_dir.join(format!(
            "{}_{}",
            item.message.chat_id.unsigned_abs(),
            item.message.id
        ))
    }

    async fn download(&self, item: &MediaRef, item_dir: &Path) -> Result<PathBuf, MediaError> {
        tokio::fs::create_dir_all(item_dir)
            .await
            .map_err(|e| MediaError::Io(format!("create {}: {e}", item_dir.display())))?;

        let downloaded = self
            .transport
            .download_media(&item.message, item_dir)
            .await
            .map_err(|e| MediaError::Download(e.to_string()))?
            .ok_or_else(|| MediaError::Download("transport returned no path".to_string()))?;

        let resolved = if tokio::fs::metadata(&downloaded)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            newest_entry(&downloaded)
                .await?
                .ok_or_else(|| MediaError::Missing(downloaded.clone()))?
        } else {
            downloaded
        };

        match tokio::fs::metadata(&resolved).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(resolved),
            Ok(meta) if meta.is_file() => Err(MediaError::EmptyFile(resolved)),
            _ => Err(MediaError::Missing(resolved)),
        }
    }

    /// Transcode an animated image to an even-sized H.264-compatible video.
    async fn convert_animated(&self, source: &Path, item_dir: &Path) -> Result<PathBuf, MediaError> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "animation".to_string());
        let target = item_dir.join(format!("{stem}.mp4"));

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            source.to_string_lossy().into_owned(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-vf".to_string(),
            "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            target.to_string_lossy().into_owned(),
        ];

        tracing::info!(source = %source.display(), target = %target.display(), "converting animated image to video");
        let run = self.runner.run(&self.ffmpeg_path, &args, self.timeout).await;
        let result = RenderResult::from_output(&run, &target).await;
        if !result.success {
            return Err(MediaError::Conversion(
                result.diagnostic.unwrap_or_else(|| "unknown failure".to_string()),
            ));
        }

        if let Err(e) = tokio::fs::remove_file(source).await {
            tracing::debug!(path = %source.display(), error = %e, "failed to remove converted source");
        }
        Ok(result.output_path)
    }

    /// Grab one frame as a thumbnail. Absence is not an error.
    async fn extract_thumbnail(&self, video: &Path) -> Option<PathBuf> {
        let target = thumbnail_path(video);
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-ss".to_string(),
            THUMBNAIL_OFFSET.to_string(),
            "-vframes".to_string(),
            "1".to_string(),
            target.to_string_lossy().into_owned(),
        ];
        let run = self.runner.run(&self.ffmpeg_path, &args, self.timeout).await;
        let result = RenderResult::from_output(&run, &target).await;
        if result.success {
            Some(result.output_path)
        } else {
            tracing::debug!(
                video = %video.display(),
                diagnostic = result.diagnostic.as_deref().unwrap_or_default(),
                "no thumbnail extracted"
            );
            None
        }
    }

    /// Check the engine's result against the watermark policy.
    async fn settle_watermark(&self, source: &Path, result: PathBuf) -> Result<(PathBuf, bool), MediaError> {
        let watermarked = result != source;
        if !watermarked {
            if self.require_watermark {
                return Err(MediaError::WatermarkRequired(source.to_path_buf()));
            }
            tracing::warn!(path = %source.display(), "publishing without watermark");
        }
        if !is_nonempty_file(&result).await {
            return Err(MediaError::WatermarkMissing(result));
        }
        Ok((result, watermarked))
    }

    async fn process_in(&self, item: &MediaRef, item_dir: &Path) -> Result<ProcessedMedia, MediaError> {
        let mut path = self.download(item, item_dir).await?;
        let mut classification = classify(&path, item.message.media.as_ref());
        tracing::debug!(message_id = item.message.id, path = %path.display(), ?classification, "media downloaded");

        if classification == Classification::AnimatedImage {
            path = self.convert_animated(&path, item_dir).await?;
            classification = Classification::Video;
        }

        let (kind, final_path, watermarked, thumbnail) = if classification == Classification::Video {
            tracing::info!(message_id = item.message.id, path = %path.display(), "processing video");
            let rendered = self
                .engine
                .apply_video_watermark(&path, &watermarked_path(&path, item_dir))
                .await;
            let (final_path, watermarked) = self.settle_watermark(&path, rendered).await?;
            let thumbnail = self.extract_thumbnail(&final_path).await;
            (MediaKind::Video, final_path, watermarked, thumbnail)
        } else {
            tracing::info!(message_id = item.message.id, path = %path.display(), "processing image");
            let rendered = self
                .engine
                .apply_image_watermark(&path, &watermarked_path(&path, item_dir))
                .await;
            let (final_path, watermarked) = self.settle_watermark(&path, rendered).await?;
            (MediaKind::Image, final_path, watermarked, None)
        };

        let info = match self.engine.inspector().inspect(&final_path).await {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(path = %final_path.display(), error = %e, "probe of processed file failed");
                None
            }
        };

        Ok(ProcessedMedia {
            file_path: final_path,
            thumbnail_path: thumbnail,
            kind,
            dimensions: info.map(|i| (i.width, i.height)),
            duration_secs: info.map(|i| i.duration_secs).filter(|d| *d > 0.0),
            watermarked,
            work_dir: item_dir.to_path_buf(),
        })
    }
}

#[async_trait]
impl MediaProcessor for MediaAcquisition {
    async fn process(&self, item: &MediaRef) -> Result<ProcessedMedia, MediaError> {
        let item_dir = self.item_dir(item);
        let result = self.process_in(item, &item_dir).await;
        if let Err(e) = &result {
            tracing::error!(message_id = item.message.id, order = item.order, error = %e, "media processing failed");
            if let Err(e) = tokio::fs::remove_dir_all(&item_dir).await {
                tracing::debug!(path = %item_dir.display(), error = %e, "failed to clean item directory");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::probe::MediaInspector;
    use crate::media::process::ProcessOutput;
    use crate::media::random::ScriptedRandom;
    use crate::media::watermark::WatermarkSpec;
    use crate::transport::{
        ChatId, Entity, FileUpload, InboundMessage, MessageId, ParseMode, Transport,
        TransportError, TransportResult,
    };
    use parking_lot::Mutex;

    #[test]
    fn test_classify_by_extension() {
        assert_eq!(classify(Path::new("a.GIF"), None), Classification::AnimatedImage);
        assert_eq!(classify(Path::new("a.mkv"), None), Classification::Video);
        assert_eq!(classify(Path::new("a.webm"), None), Classification::Video);
        assert_eq!(classify(Path::new("a.jpg"), None), Classification::Image);
        assert_eq!(classify(Path::new("a"), None), Classification::Image);
    }

    #[test]
    fn test_classify_video_attribute() {
        let attachment = MediaAttachment {
            video_attribute: true,
            ..Default::default()
        };
        assert_eq!(classify(Path::new("a.bin"), Some(&attachment)), Classification::Video);
    }

    #[test]
    fn test_classify_falls_back_to_attachment_name() {
        let attachment = MediaAttachment {
            file_name: Some("loop.gif".to_string()),
            ..Default::default()
        };
        assert_eq!(classify(Path::new("download"), Some(&attachment)), Classification::AnimatedImage);
    }

    #[test]
    fn test_derived_paths() {
        let dir = Path::new("/work/1_7");
        assert_eq!(watermarked_path(Path::new("/work/1_7/clip.mp4"), dir), PathBuf::from("/work/1_7/wm_clip.mp4"));
        assert_eq!(thumbnail_path(Path::new("/work/1_7/wm_clip.mp4")), PathBuf::from("/work/1_7/wm_clip_thumb.jpg"));
    }

    /// Writes canned bytes on download
    struct DownloadOnly {
        file_name: &'static str,
        bytes: &'static [u8],
        as_directory: bool,
    }

    #[async_trait]
    impl Transport for DownloadOnly {
        async fn download_media(&self, _m: &InboundMessage, dest_dir: &Path) -> TransportResult<Option<PathBuf>> {
            if self.as_directory {
                let nested = dest_dir.join("nested");
                tokio::fs::create_dir_all(&nested).await.unwrap();
                tokio::fs::write(nested.join(self.file_name), self.bytes).await.unwrap();
                return Ok(Some(nested));
            }
            let path = dest_dir.join(self.file_name);
            tokio::fs::write(&path, self.bytes).await.unwrap();
            Ok(Some(path))
        }
        async fn recent_messages(&self, _c: ChatId, _l: usize) -> TransportResult<Vec<InboundMessage>> {
            Ok(Vec::new())
        }
        async fn send_message(&self, _to: ChatId, _t: &str) -> TransportResult<MessageId> {
            Err(TransportError::NotConnected)
        }
        async fn send_file(&self, _to: ChatId, _u: FileUpload) -> TransportResult<MessageId> {
            Err(TransportError::NotConnected)
        }
        async fn forward_message(&self, _to: ChatId, _f: ChatId, _m: MessageId) -> TransportResult<MessageId> {
            Err(TransportError::NotConnected)
        }
        async fn edit_message(&self, _c: ChatId, _m: MessageId, _b: &str, _p: ParseMode) -> TransportResult<()> {
            Err(TransportError::NotConnected)
        }
        async fn resolve_entity(&self, h: &str) -> TransportResult<Entity> {
            Err(TransportError::EntityNotFound(h.to_string()))
        }
    }

    /// ffprobe answers with a 640x480 stream; ffmpeg writes `b"out"` to its
    /// last argument unless that kind of invocation is set to fail.
    struct FakeTools {
        fail_conversion: bool,
        fail_overlay: bool,
        calls: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl ProcessRunner for FakeTools {
        async fn run(&self, program: &str, args: &[String], _limit: Duration) -> ProcessOutput {
            self.calls.lock().push(args.to_vec());
            if program == "ffprobe" {
                return ProcessOutput {
                    status_code: Some(0),
                    stdout: r#"{"streams":[{"width":640,"height":480,"duration":"2.5"}]}"#.to_string(),
                    ..Default::default()
                };
            }
            let is_conversion = args.iter().any(|a| a == "yuv420p");
            let is_overlay = args.iter().any(|a| a.starts_with("drawtext="));
            if (is_conversion && self.fail_conversion) || (is_overlay && self.fail_overlay) {
                return ProcessOutput {
                    status_code: Some(1),
                    stderr: "failed".to_string(),
                    ..Default::default()
                };
            }
            if let Some(out) = args.last() {
                tokio::fs::write(out, b"out").await.unwrap();
            }
            ProcessOutput {
                status_code: Some(0),
                ..Default::default()
            }
        }
    }

    fn item(id: MessageId, file_name: &str, video: bool) -> MediaRef {
        MediaRef {
            message: InboundMessage {
                id,
                chat_id: 555,
                sender_id: Some(555),
                outgoing: false,
                text: String::new(),
                grouped_id: None,
                media: Some(MediaAttachment {
                    file_name: Some(file_name.to_string()),
                    mime_type: None,
                    video_attribute: video,
                    size: None,
                }),
                date: chrono::Utc::now(),
            },
            order: 0,
        }
    }

    fn acquisition(
        work_dir: &Path,
        transport: DownloadOnly,
        tools: Arc<FakeTools>,
    ) -> MediaAcquisition {
        let runner: Arc<dyn ProcessRunner> = tools;
        let inspector = MediaInspector::new(runner.clone(), "ffprobe", Duration::from_secs(5));
        let engine = WatermarkEngine::new(
            WatermarkSpec::default(),
            None,
            inspector,
            runner.clone(),
            "ffmpeg",
            Duration::from_secs(5),
        )
        .with_random_source(Box::new(ScriptedRandom::new(vec![0, 1, 1])));
        MediaAcquisition::new(
            Arc::new(transport),
            Arc::new(engine),
            runner,
            "ffmpeg",
            Duration::from_secs(5),
            work_dir,
        )
    }

    fn tools(fail_conversion: bool, fail_overlay: bool) -> Arc<FakeTools> {
        Arc::new(FakeTools {
            fail_conversion,
            fail_overlay,
            calls: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_video_is_watermarked_with_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DownloadOnly {
            file_name: "clip.mp4",
            bytes: b"video",
            as_directory: false,
        };
        let acq = acquisition(dir.path(), transport, tools(false, false));
        let processed = acq.process(&item(7, "clip.mp4", true)).await.unwrap();

        assert_eq!(processed.kind, MediaKind::Video);
        assert!(processed.watermarked);
        assert_eq!(processed.file_path, dir.path().join("555_7").join("wm_clip.mp4"));
        assert_eq!(
            processed.thumbnail_path,
            Some(dir.path().join("555_7").join("wm_clip_thumb.jpg"))
        );
        assert_eq!(processed.dimensions, Some((640, 480)));
        assert_eq!(processed.duration_secs, Some(2.5));
    }

    #[tokio::test]
    async fn test_directory_download_uses_newest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DownloadOnly {
            file_name: "clip.mov",
            bytes: b"video",
            as_directory: true,
        };
        let acq = acquisition(dir.path(), transport, tools(false, false));
        let processed = acq.process(&item(8, "clip.mov", false)).await.unwrap();
        assert_eq!(processed.kind, MediaKind::Video);
        assert!(processed.file_path.ends_with("wm_clip.mov"));
    }

    #[tokio::test]
    async fn test_empty_download_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DownloadOnly {
            file_name: "clip.mp4",
            bytes: b"",
            as_directory: false,
        };
        let acq = acquisition(dir.path(), transport, tools(false, false));
        let err = acq.process(&item(9, "clip.mp4", true)).await.unwrap_err();
        assert!(matches!(err, MediaError::EmptyFile(_)));
        assert!(!dir.path().join("555_9").exists());
    }

    #[tokio::test]
    async fn test_animated_image_converted_then_watermarked() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DownloadOnly {
            file_name: "loop.gif",
            bytes: b"GIF89a",
            as_directory: false,
        };
        let acq = acquisition(dir.path(), transport, tools(false, false));
        let processed = acq.process(&item(10, "loop.gif", false)).await.unwrap();

        let item_dir = dir.path().join("555_10");
        assert_eq!(processed.kind, MediaKind::Video);
        assert_eq!(processed.file_path, item_dir.join("wm_loop.mp4"));
        assert!(!item_dir.join("loop.gif").exists());
    }

    #[tokio::test]
    async fn test_failed_conversion_fails_item() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DownloadOnly {
            file_name: "loop.gif",
            bytes: b"GIF89a",
            as_directory: false,
        };
        let acq = acquisition(dir.path(), transport, tools(true, false));
        let err = acq.process(&item(11, "loop.gif", false)).await.unwrap_err();
        assert!(matches!(err, MediaError::Conversion(_)));
    }

    #[tokio::test]
    async fn test_degraded_video_published_unwatermarked_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DownloadOnly {
            file_name: "clip.mp4",
            bytes: b"video",
            as_directory: false,
        };
        let acq = acquisition(dir.path(), transport, tools(false, true));
        let processed = acq.process(&item(12, "clip.mp4", true)).await.unwrap();
        assert!(!processed.watermarked);
        assert_eq!(processed.file_path, dir.path().join("555_12").join("clip.mp4"));
    }

    #[tokio::test]
    async fn test_degraded_video_rejected_when_required() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DownloadOnly {
            file_name: "clip.mp4",
            bytes: b"video",
            as_directory: false,
        };
        let acq = acquisition(dir.path(), transport, tools(false, true)).with_require_watermark(true);
        let err = acq.process(&item(13, "clip.mp4", true)).await.unwrap_err();
        assert!(matches!(err, MediaError::WatermarkRequired(_)));
    }

    #[tokio::test]
    async fn test_image_without_font_is_degraded_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DownloadOnly {
            file_name: "photo.jpg",
            bytes: b"jpeg",
            as_directory: false,
        };
        let acq = acquisition(dir.path(), transport, tools(false, false));
        let processed = acq.process(&item(14, "photo.jpg", false)).await.unwrap();
        assert_eq!(processed.kind, MediaKind::Image);
        assert!(processed.thumbnail_path.is_none());
        assert!(!processed.watermarked);
    }
}
