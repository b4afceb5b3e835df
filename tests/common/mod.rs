//! Shared fixtures for coordinator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use relaymark::config::{Config, NegotiationConfig};
use relaymark::media::{MediaError, MediaKind, MediaProcessor, MediaRef, ProcessedMedia};
use relaymark::negotiate::LinkNegotiator;
use relaymark::publish::{message_link, CaptionEditor, PublishRelay};
use relaymark::session::{
    CoordinatorHandle, CoordinatorSettings, CoordinatorStatus, Dispatcher, SessionCoordinator,
};
use relaymark::transport::{
    ChatId, GroupId, InboundMessage, MediaAttachment, MemoryTransport, MessageId, Outbound,
};

pub const CHANNEL: ChatId = -1001234567890;
pub const SELF_ID: ChatId = 1;
pub const DELIVERY_AGENT: ChatId = 700;
pub const LINK_AGENT: ChatId = 800;

pub const BATCH_LINK: &str = "https://t.me/link_bot?start=BATCH_B";
pub const SINGLE_LINK: &str = "https://t.me/link_bot?start=SINGLE_S";

/// Transport whose link agent follows the handshake script.
pub fn scripted_transport() -> MemoryTransport {
    let links_seen = AtomicUsize::new(0);
    MemoryTransport::new(SELF_ID)
        .with_entity("@files_bot", DELIVERY_AGENT)
        .with_entity("@link_bot", LINK_AGENT)
        .with_responder(Box::new(move |call| match call {
            Outbound::Text { to, text, .. } if *to == LINK_AGENT && text == "/batch" => {
                vec!["OK, send me the first message of the batch".to_string()]
            }
            Outbound::Text { to, text, .. } if *to == LINK_AGENT && text.starts_with("https://t.me/c/") => {
                if links_seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    vec!["Now send the last message".to_string()]
                } else {
                    vec![format!("Batch ready: {BATCH_LINK}")]
                }
            }
            Outbound::Text { to, text, .. } if *to == LINK_AGENT && text == "/genlink" => {
                vec!["Send me the file you want a link for".to_string()]
            }
            Outbound::Forward { to, .. } if *to == LINK_AGENT => {
                vec![format!("Here you go {SINGLE_LINK}")]
            }
            _ => Vec::new(),
        }))
}

/// Transport whose link agent never answers.
pub fn silent_transport() -> MemoryTransport {
    MemoryTransport::new(SELF_ID)
        .with_entity("@files_bot", DELIVERY_AGENT)
        .with_entity("@link_bot", LINK_AGENT)
}

/// A channel post with `text`, optionally part of `group` and carrying media.
pub fn channel_message(id: MessageId, text: &str, group: Option<GroupId>, with_media: bool) -> InboundMessage {
    InboundMessage {
        id,
        chat_id: CHANNEL,
        sender_id: None,
        outgoing: false,
        text: text.to_string(),
        grouped_id: group,
        media: with_media.then(|| MediaAttachment {
            file_name: Some("cover.jpg".to_string()),
            ..Default::default()
        }),
        date: chrono::Utc::now(),
    }
}

/// Processor that skips downloading and hands back a small temp file per item.
pub struct FakeProcessor {
    dir: tempfile::TempDir,
    failing_orders: HashSet<usize>,
    processed: Mutex<Vec<usize>>,
}

impl FakeProcessor {
    pub fn new() -> Self {
        Self::failing(&[])
    }

    pub fn failing(orders: &[usize]) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            failing_orders: orders.iter().copied().collect(),
            processed: Mutex::new(Vec::new()),
        }
    }

    /// Arrival orders handed to the processor, in call order.
    pub fn processed(&self) -> Vec<usize> {
        self.processed.lock().clone()
    }
}

#[async_trait]
impl MediaProcessor for FakeProcessor {
    async fn process(&self, item: &MediaRef) -> Result<ProcessedMedia, MediaError> {
        self.processed.lock().push(item.order);
        if self.failing_orders.contains(&item.order) {
            return Err(MediaError::EmptyFile(PathBuf::from(format!("item-{}", item.order))));
        }
        let work_dir = self.dir.path().join(format!("{}", item.message.id));
        tokio::fs::create_dir_all(&work_dir).await.unwrap();
        let file_path = work_dir.join("wm_photo.jpg");
        tokio::fs::write(&file_path, b"jpeg").await.unwrap();
        Ok(ProcessedMedia {
            file_path,
            thumbnail_path: None,
            kind: MediaKind::Image,
            dimensions: Some((640, 480)),
            duration_secs: None,
            watermarked: true,
            work_dir,
        })
    }
}

pub struct Harness {
    pub transport: Arc<MemoryTransport>,
    pub processor: Arc<FakeProcessor>,
    pub handle: CoordinatorHandle,
}

impl Harness {
    pub fn start(transport: MemoryTransport, processor: FakeProcessor) -> Self {
        let transport = Arc::new(transport);
        let processor = Arc::new(processor);

        let mut config = Config::default();
        config.channel.target_channel_id = Some(CHANNEL);
        config.channel.link_agent = "@link_bot".to_string();

        let dispatcher = Dispatcher::new(
            processor.clone(),
            PublishRelay::new(transport.clone(), CHANNEL),
            LinkNegotiator::new(transport.clone(), "@link_bot", &NegotiationConfig::default()),
            CaptionEditor::new(transport.clone()),
        );
        let settings = CoordinatorSettings::from_config(&config).unwrap();
        let (handle, _task) = SessionCoordinator::spawn(settings, transport.clone(), Arc::new(dispatcher));

        Self {
            transport,
            processor,
            handle,
        }
    }

    /// Add a channel post to the transport's history without feeding it in.
    pub fn channel_post(&self, id: MessageId, text: &str, group: Option<GroupId>, with_media: bool) -> InboundMessage {
        let message = channel_message(id, text, group, with_media);
        self.transport.push_message(message.clone());
        message
    }

    /// Post a channel message carrying media and `text`, and feed it in.
    pub fn post_trigger(&self, id: MessageId, text: &str, group: Option<GroupId>) -> InboundMessage {
        let message = self.channel_post(id, text, group, true);
        self.handle.ingest(message.clone());
        message
    }

    /// Deliver one media item from the delivery agent.
    pub fn deliver(&self) -> InboundMessage {
        let message = self
            .transport
            .media_message(DELIVERY_AGENT, "photo.jpg", b"jpeg".to_vec());
        self.handle.ingest(message.clone());
        message
    }

    pub async fn wait_for(&self, predicate: impl FnMut(&CoordinatorStatus) -> bool) -> CoordinatorStatus {
        let mut rx = self.handle.subscribe();
        let status = tokio::time::timeout(Duration::from_secs(600), rx.wait_for(predicate))
            .await
            .expect("coordinator did not reach the expected status")
            .expect("coordinator stopped");
        status.clone()
    }

    pub fn uploads(&self) -> Vec<MessageId> {
        self.transport
            .outbound()
            .into_iter()
            .filter_map(|call| match call {
                Outbound::File { to, id, .. } if to == CHANNEL => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn link_of(&self, message_id: MessageId) -> String {
        message_link(CHANNEL, message_id)
    }
}
