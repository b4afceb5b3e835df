//! Publish relay
//!
//! Uploads processed media to the destination channel and derives each
//! upload's public message link.

pub mod caption;

use serde::{Deserialize, Serialize};

use crate::media::{MediaKind, ProcessedMedia};
use crate::transport::{ChatId, DynTransport, FileUpload, MessageId, TransportError, VideoAttributes};

pub use caption::{render_caption, CaptionEditor, CAPTION_HEADER};

/// One published item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub message_id: MessageId,
    pub message_link: String,
    /// Arrival order of the source item within its session
    pub order: usize,
}

/// Public link of message `message_id` in channel `channel_id`.
///
/// Channel IDs carry a `-100` prefix that the link form omits.
pub fn message_link(channel_id: ChatId, message_id: MessageId) -> String {
    let raw = channel_id.to_string();
    let internal = raw
        .strip_prefix("-100")
        .or_else(|| raw.strip_prefix('-'))
        .unwrap_or(&raw);
    format!("https://t.me/c/{internal}/{message_id}")
}

/// Video attributes for an upload, when the item is a probed video.
pub fn video_attributes(media: &ProcessedMedia) -> Option<VideoAttributes> {
    if media.kind != MediaKind::Video {
        return None;
    }
    let (width, height) = media.dimensions?;
    let duration = media.duration_secs.unwrap_or_default();
    Some(VideoAttributes {
        duration_secs: if duration.is_finite() && duration > 0.0 {
            duration.min(f64::from(u32::MAX)) as u32
        } else {
            0
        },
        width,
        height,
        supports_streaming: true,
    })
}

/// Uploads processed items to the destination channel
pub struct PublishRelay {
    transport: DynTransport,
    channel_id: ChatId,
}

impl PublishRelay {
    pub fn new(transport: DynTransport, channel_id: ChatId) -> Self {
        Self {
            transport,
            channel_id,
        }
    }

    pub fn channel_id(&self) -> ChatId {
        self.channel_id
    }

    /// Upload `media` and dispose of its files, whatever the outcome.
    pub async fn upload(&self, media: ProcessedMedia, order: usize) -> Result<UploadRecord, TransportError> {
        let upload = FileUpload {
            path: media.file_path.clone(),
            thumbnail: media.thumbnail_path.clone(),
            video: video_attributes(&media),
        };

        tracing::info!(
            order,
            path = %upload.path.display(),
            kind = ?media.kind,
            has_thumbnail = upload.thumbnail.is_some(),
            "uploading to channel"
        );
        let sent = self.transport.send_file(self.channel_id, upload).await;
        media.dispose().await;

        let message_id = sent.map_err(|e| {
            tracing::error!(order, error = %e, "upload failed");
            e
        })?;
        let record = UploadRecord {
            message_id,
            message_link: message_link(self.channel_id, message_id),
            order,
        };
        tracing::info!(order, link = %record.message_link, "uploaded");
        Ok(record)
    }
}
