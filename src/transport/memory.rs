//! In-memory transport
//!
//! A [`Transport`] that keeps every chat's history in process memory and lets
//! a responder closure play the remote agents. Useful for dry runs and for
//! driving the coordinator in tests without a network client.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::{
    ChatId, Entity, FileUpload, InboundMessage, MediaAttachment, MessageId, ParseMode, Transport,
    TransportError, TransportResult,
};

/// A call made through the transport
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text {
        to: ChatId,
        id: MessageId,
        text: String,
    },
    File {
        to: ChatId,
        id: MessageId,
        upload: FileUpload,
    },
    Forward {
        to: ChatId,
        id: MessageId,
        from_chat: ChatId,
        message_id: MessageId,
    },
    Edit {
        chat: ChatId,
        message_id: MessageId,
        body: String,
        mode: ParseMode,
    },
}

/// Produces the replies a remote peer posts after a call.
///
/// Returned texts are appended to the addressed chat as incoming messages.
pub type Responder = Box<dyn Fn(&Outbound) -> Vec<String> + Send + Sync>;

#[derive(Default)]
struct State {
    next_id: MessageId,
    history: HashMap<ChatId, Vec<InboundMessage>>,
    outbound: Vec<Outbound>,
    downloads: HashMap<(ChatId, MessageId), Vec<u8>>,
    failing_chats: HashSet<ChatId>,
}

impl State {
    fn allocate_id(&mut self) -> MessageId {
        self.next_id += 1;
        self.next_id
    }

    fn append(&mut self, chat: ChatId, sender: Option<ChatId>, outgoing: bool, text: String) -> MessageId {
        let id = self.allocate_id();
        self.history.entry(chat).or_default().push(InboundMessage {
            id,
            chat_id: chat,
            sender_id: sender,
            outgoing,
            text,
            grouped_id: None,
            media: None,
            date: Utc::now(),
        });
        id
    }
}

/// Process-local transport with scripted peers
pub struct MemoryTransport {
    self_id: ChatId,
    state: Mutex<State>,
    entities: Mutex<HashMap<String, Entity>>,
    stalled: HashSet<String>,
    responder: Option<Responder>,
}

impl MemoryTransport {
    /// Create a transport acting as account `self_id`.
    pub fn new(self_id: ChatId) -> Self {
        Self {
            self_id,
            state: Mutex::new(State {
                next_id: 1000,
                ..Default::default()
            }),
            entities: Mutex::new(HashMap::new()),
            stalled: HashSet::new(),
            responder: None,
        }
    }

    /// Register a resolvable peer; the handle is stored with its leading `@`.
    pub fn with_entity(self, handle: &str, id: ChatId) -> Self {
        let handle = if handle.starts_with('@') {
            handle.to_string()
        } else {
            format!("@{handle}")
        };
        self.entities.lock().insert(handle.clone(), Entity { id, handle });
        self
    }

    /// Make resolving `handle` hang forever, like a peer that never answers.
    pub fn with_stalled_entity(mut self, handle: &str) -> Self {
        self.stalled.insert(handle.to_string());
        self
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Make every call addressed to `chat` fail.
    pub fn fail_chat(&self, chat: ChatId) {
        self.state.lock().failing_chats.insert(chat);
    }

    /// Insert an existing message into its chat's history.
    pub fn push_message(&self, message: InboundMessage) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(message.id);
        let chat = state.history.entry(message.chat_id).or_default();
        chat.push(message);
        chat.sort_by_key(|m| m.id);
    }

    /// Post an incoming text message from `chat` into its own history.
    pub fn post_reply(&self, chat: ChatId, text: &str) -> MessageId {
        self.state.lock().append(chat, Some(chat), false, text.to_string())
    }

    /// Create an incoming media message whose download yields `bytes`.
    pub fn media_message(&self, chat: ChatId, file_name: &str, bytes: Vec<u8>) -> InboundMessage {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.downloads.insert((chat, id), bytes);
        let message = InboundMessage {
            id,
            chat_id: chat,
            sender_id: Some(chat),
            outgoing: false,
            text: String::new(),
            grouped_id: None,
            media: Some(MediaAttachment {
                file_name: Some(file_name.to_string()),
                ..Default::default()
            }),
            date: Utc::now(),
        };
        state.history.entry(chat).or_default().push(message.clone());
        message
    }

    /// Every call made so far, in order.
    pub fn outbound(&self) -> Vec<Outbound> {
        self.state.lock().outbound.clone()
    }

    /// Texts sent to `chat`, in order.
    pub fn texts_sent_to(&self, chat: ChatId) -> Vec<String> {
        self.state
            .lock()
            .outbound
            .iter()
            .filter_map(|call| match call {
                Outbound::Text { to, text, .. } if *to == chat => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Edits applied so far.
    pub fn edits(&self) -> Vec<Outbound> {
        self.state
            .lock()
            .outbound
            .iter()
            .filter(|call| matches!(call, Outbound::Edit { .. }))
            .cloned()
            .collect()
    }

    fn check_chat(&self, chat: ChatId) -> TransportResult<()> {
        if self.state.lock().failing_chats.contains(&chat) {
            return Err(TransportError::SendFailed(format!("chat {chat} unavailable")));
        }
        Ok(())
    }

    /// Record an outgoing message, then let the responder answer it.
    fn deliver(&self, chat: ChatId, text: String, build: impl FnOnce(MessageId) -> Outbound) -> MessageId {
        let call = {
            let mut state = self.state.lock();
            let id = state.append(chat, Some(self.self_id), true, text);
            let call = build(id);
            state.outbound.push(call.clone());
            call
        };
        if let Some(responder) = &self.responder {
            let replies = responder(&call);
            let mut state = self.state.lock();
            for reply in replies {
                state.append(chat, Some(chat), false, reply);
            }
        }
        match call {
            Outbound::Text { id, .. } | Outbound::File { id, .. } | Outbound::Forward { id, .. } => id,
            Outbound::Edit { message_id, .. } => message_id,
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn download_media(
        &self,
        message: &InboundMessage,
        dest_dir: &Path,
    ) -> TransportResult<Option<PathBuf>> {
        let bytes = self
            .state
            .lock()
            .downloads
            .get(&(message.chat_id, message.id))
            .cloned();
        let Some(bytes) = bytes else {
            return Ok(None);
        };
        let name = message
            .media
            .as_ref()
            .and_then(|m| m.file_name.clone())
            .unwrap_or_else(|| format!("{}.bin", message.id));
        let path = dest_dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| TransportError::DownloadFailed(e.to_string()))?;
        Ok(Some(path))
    }

    async fn recent_messages(
        &self,
        chat: ChatId,
        limit: usize,
    ) -> TransportResult<Vec<InboundMessage>> {
        let state = self.state.lock();
        Ok(state
            .history
            .get(&chat)
            .map(|messages| messages.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(&self, to: ChatId, text: &str) -> TransportResult<MessageId> {
        self.check_chat(to)?;
        let text = text.to_string();
        Ok(self.deliver(to, text.clone(), |id| Outbound::Text { to, id, text }))
    }

    async fn send_file(&self, to: ChatId, upload: FileUpload) -> TransportResult<MessageId> {
        self.check_chat(to)?;
        Ok(self.deliver(to, String::new(), |id| Outbound::File { to, id, upload }))
    }

    async fn forward_message(
        &self,
        to: ChatId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> TransportResult<MessageId> {
        self.check_chat(to)?;
        Ok(self.deliver(to, String::new(), |id| Outbound::Forward {
            to,
            id,
            from_chat,
            message_id,
        }))
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message_id: MessageId,
        body: &str,
        mode: ParseMode,
    ) -> TransportResult<()> {
        self.check_chat(chat)?;
        let mut state = self.state.lock();
        let message = state
            .history
            .get_mut(&chat)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message_id))
            .ok_or_else(|| TransportError::EditFailed(format!("message {message_id} not found in {chat}")))?;
        message.text = body.to_string();
        state.outbound.push(Outbound::Edit {
            chat,
            message_id,
            body: body.to_string(),
            mode,
        });
        Ok(())
    }

    async fn resolve_entity(&self, handle: &str) -> TransportResult<Entity> {
        if self.stalled.contains(handle) {
            std::future::pending::<()>().await;
        }
        self.entities
            .lock()
            .get(handle)
            .cloned()
            .ok_or_else(|| TransportError::EntityNotFound(handle.to_string()))
    }
}
