//! Session dispatch.
//!
//! Runs once a collection window closes: processes and uploads every
//! collected item in arrival order, negotiates a link on the path chosen by
//! the collected count and finalizes the trigger's caption.

use std::sync::Arc;

use crate::config::{Config, ConfigError};
use crate::media::{MediaProcessor, MediaRef};
use crate::negotiate::{HandshakeRequest, LinkNegotiator};
use crate::publish::{CaptionEditor, PublishRelay, UploadRecord};
use crate::transport::{ChatId, DynTransport, MessageId};

/// Handshake path for a closed session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    Single,
    Batch,
}

impl DispatchPath {
    /// Path for `collected` items; `None` when there is nothing to publish.
    pub fn for_count(collected: usize) -> Option<Self> {
        match collected {
            0 => None,
            1 => Some(DispatchPath::Single),
            _ => Some(DispatchPath::Batch),
        }
    }
}

/// Everything dispatch needs from a closed session
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchJob {
    pub session_id: u64,
    pub trigger_chat: ChatId,
    pub trigger_message_id: MessageId,
    pub items: Vec<MediaRef>,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The window closed with nothing collected
    NoMedia,
    /// Every item failed before or during upload
    NothingPublished { path: DispatchPath, attempted: usize },
    /// Uploads went out but no link was issued
    NegotiationFailed { path: DispatchPath, uploads: Vec<UploadRecord> },
    /// A link was issued but the caption edit failed
    CaptionFailed { issued_link: String, reason: String },
    /// The trigger's caption now carries the issued link
    Finalized {
        path: DispatchPath,
        issued_link: String,
        uploads: Vec<UploadRecord>,
    },
    /// The dispatch task itself died
    Aborted { reason: String },
}

impl DispatchOutcome {
    pub fn issued_link(&self) -> Option<&str> {
        match self {
            DispatchOutcome::CaptionFailed { issued_link, .. } | DispatchOutcome::Finalized { issued_link, .. } => {
                Some(issued_link)
            }
            _ => None,
        }
    }
}

/// Publish-and-link pipeline shared by every session
pub struct Dispatcher {
    processor: Arc<dyn MediaProcessor>,
    relay: PublishRelay,
    negotiator: LinkNegotiator,
    caption: CaptionEditor,
}

impl Dispatcher {
    pub fn new(
        processor: Arc<dyn MediaProcessor>,
        relay: PublishRelay,
        negotiator: LinkNegotiator,
        caption: CaptionEditor,
    ) -> Self {
        Self {
            processor,
            relay,
            negotiator,
            caption,
        }
    }

    /// Pipeline publishing to the configured channel and negotiating with
    /// the configured link agent.
    pub fn from_config(
        config: &Config,
        transport: DynTransport,
        processor: Arc<dyn MediaProcessor>,
    ) -> Result<Self, ConfigError> {
        let channel_id = config
            .channel
            .target_channel_id
            .ok_or_else(|| ConfigError::Invalid("channel.targetChannelId is required".to_string()))?;
        Ok(Self::new(
            processor,
            PublishRelay::new(transport.clone(), channel_id),
            LinkNegotiator::new(transport.clone(), config.channel.link_agent.clone(), &config.negotiation),
            CaptionEditor::new(transport),
        ))
    }

    pub async fn dispatch(&self, job: DispatchJob) -> DispatchOutcome {
        let Some(path) = DispatchPath::for_count(job.items.len()) else {
            tracing::warn!(session_id = job.session_id, "collection window closed with no media");
            return DispatchOutcome::NoMedia;
        };
        tracing::info!(session_id = job.session_id, items = job.items.len(), ?path, "dispatching");

        let uploads = self.publish_all(job.session_id, &job.items).await;
        let (Some(first), Some(last)) = (uploads.first(), uploads.last()) else {
            tracing::error!(session_id = job.session_id, "no item could be published");
            return DispatchOutcome::NothingPublished {
                path,
                attempted: job.items.len(),
            };
        };

        let request = match path {
            DispatchPath::Single => HandshakeRequest::Single {
                from_chat: self.relay.channel_id(),
                message_id: first.message_id,
            },
            DispatchPath::Batch => HandshakeRequest::Batch {
                first_link: first.message_link.clone(),
                last_link: last.message_link.clone(),
            },
        };

        let Some(issued_link) = self.negotiator.negotiate(&request).await.issued_link else {
            return DispatchOutcome::NegotiationFailed { path, uploads };
        };
        tracing::info!(session_id = job.session_id, link = %issued_link, "link issued");

        match self
            .caption
            .finalize(job.trigger_chat, job.trigger_message_id, &issued_link)
            .await
        {
            Ok(()) => DispatchOutcome::Finalized {
                path,
                issued_link,
                uploads,
            },
            Err(e) => {
                tracing::error!(session_id = job.session_id, error = %e, "caption edit failed");
                DispatchOutcome::CaptionFailed {
                    issued_link,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Process and upload items one by one; failed items are skipped.
    async fn publish_all(&self, session_id: u64, items: &[MediaRef]) -> Vec<UploadRecord> {
        let mut ordered: Vec<&MediaRef> = items.iter().collect();
        ordered.sort_by_key(|item| item.order);

        let mut uploads = Vec::with_capacity(ordered.len());
        for item in ordered {
            let processed = match self.processor.process(item).await {
                Ok(processed) => processed,
                Err(e) => {
                    tracing::error!(session_id, order = item.order, error = %e, "skipping item");
                    continue;
                }
            };
            match self.relay.upload(processed, item.order).await {
                Ok(record) => uploads.push(record),
                Err(e) => tracing::error!(session_id, order = item.order, error = %e, "skipping item"),
            }
        }
        uploads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_for_count() {
        assert_eq!(DispatchPath::for_count(0), None);
        assert_eq!(DispatchPath::for_count(1), Some(DispatchPath::Single));
        assert_eq!(DispatchPath::for_count(2), Some(DispatchPath::Batch));
        assert_eq!(DispatchPath::for_count(40), Some(DispatchPath::Batch));
    }

    #[test]
    fn test_issued_link_accessor() {
        assert_eq!(DispatchOutcome::NoMedia.issued_link(), None);
        let outcome = DispatchOutcome::CaptionFailed {
            issued_link: "https://t.me/b?start=x".to_string(),
            reason: "edit failed".to_string(),
        };
        assert_eq!(outcome.issued_link(), Some("https://t.me/b?start=x"));
    }
}
