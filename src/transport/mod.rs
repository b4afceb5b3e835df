//! Chat Transport
//!
//! Defines the interface the relay consumes from the chat-transport client.
//! Connection, authentication and update delivery live outside this crate;
//! an embedding application implements [`Transport`] on top of its client and
//! feeds inbound messages to the session coordinator.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of a chat, channel or user peer.
pub type ChatId = i64;

/// Identifier of a message within its chat.
pub type MessageId = i64;

/// Identifier shared by every message of one media group.
pub type GroupId = i64;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Transport not connected")]
    NotConnected,

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Message edit failed: {0}")]
    EditFailed(String),

    #[error("Rate limited: retry after {0}s")]
    RateLimited(u64),

    #[error("Transport error: {0}")]
    Other(String),
}

/// Media carried by an inbound message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// Original file name, when the transport knows it
    pub file_name: Option<String>,
    /// MIME type reported by the transport
    pub mime_type: Option<String>,
    /// Whether the document carries an explicit video attribute
    pub video_attribute: bool,
    /// Size in bytes, when known
    pub size: Option<u64>,
}

impl MediaAttachment {
    /// Lowercased extension of the reported file name, if any
    pub fn extension(&self) -> Option<String> {
        self.file_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

/// Incoming message observed on the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message ID within `chat_id`
    pub id: MessageId,
    /// Chat the message was posted in
    pub chat_id: ChatId,
    /// Sender ID (absent for anonymous channel posts)
    pub sender_id: Option<ChatId>,
    /// Whether the message was authored by this account
    pub outgoing: bool,
    /// Text or caption
    pub text: String,
    /// Media group the message belongs to
    pub grouped_id: Option<GroupId>,
    /// Attached media
    pub media: Option<MediaAttachment>,
    /// Timestamp
    pub date: DateTime<Utc>,
}

impl InboundMessage {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }
}

/// A resolved peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Peer ID; also the chat ID of the private conversation with it
    pub id: ChatId,
    /// Public handle, including the leading `@`
    pub handle: String,
}

/// Video attributes attached to an uploaded document
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoAttributes {
    pub duration_secs: u32,
    pub width: u32,
    pub height: u32,
    pub supports_streaming: bool,
}

/// A local file to upload
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub path: PathBuf,
    pub thumbnail: Option<PathBuf>,
    pub video: Option<VideoAttributes>,
}

/// How a message body is interpreted by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    Plain,
    Html,
}

/// Operations consumed from the chat-transport client.
///
/// Every call is a potentially failing network call; implementations must not
/// retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Download the media of `message` into `dest_dir`.
    ///
    /// Returns the path the transport wrote (a file, or a directory holding
    /// the file), or `None` when the transport produced nothing.
    async fn download_media(
        &self,
        message: &InboundMessage,
        dest_dir: &Path,
    ) -> TransportResult<Option<PathBuf>>;

    /// Most recent messages of `chat`, newest first.
    async fn recent_messages(
        &self,
        chat: ChatId,
        limit: usize,
    ) -> TransportResult<Vec<InboundMessage>>;

    /// Send a plain text message and return its ID.
    async fn send_message(&self, to: ChatId, text: &str) -> TransportResult<MessageId>;

    /// Upload a file and return the ID of the resulting message.
    async fn send_file(&self, to: ChatId, upload: FileUpload) -> TransportResult<MessageId>;

    /// Forward `message_id` from `from_chat` to `to`, returning the new message ID.
    async fn forward_message(
        &self,
        to: ChatId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> TransportResult<MessageId>;

    /// Replace the body of an existing message.
    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        body: &str,
        mode: ParseMode,
    ) -> TransportResult<()>;

    /// Resolve a public handle such as `@some_bot`.
    async fn resolve_entity(&self, handle: &str) -> TransportResult<Entity>;
}

/// Type-erased transport for storage
pub type DynTransport = Arc<dyn Transport>;

pub use memory::{MemoryTransport, Outbound, Responder};
