//! Link negotiation
//!
//! Two-phase handshake with the link-issuing agent. The agent answers one
//! message at a time, so each step sends a command or link and then polls the
//! agent's latest reply until it shows the expected marker:
//!
//! - batch: `/batch` → "first message" → first link → "last message" →
//!   last link → issued link
//! - single: `/genlink` → "send" → forwarded upload → issued link
//!
//! Every poll phase is bounded by a fixed number of attempts. Exhausting one
//! is a [`NegotiationError::Timeout`]; the caller leaves the caption alone.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use crate::config::NegotiationConfig;
use crate::transport::{ChatId, DynTransport, Entity, InboundMessage, MessageId, TransportError};

/// Command opening a multi-item handshake.
pub const BATCH_COMMAND: &str = "/batch";

/// Command opening a single-item handshake.
pub const SINGLE_COMMAND: &str = "/genlink";

pub const FIRST_MESSAGE_MARKER: &str = "first message";
pub const LAST_MESSAGE_MARKER: &str = "last message";
pub const SEND_MARKER: &str = "send";

static ISSUED_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https://t\.me/[^?\s]+\?start=[\w-]+").unwrap());

/// First shareable link in an agent reply.
pub fn extract_issued_link(body: &str) -> Option<String> {
    ISSUED_LINK_RE.find(body).map(|m| m.as_str().to_string())
}

/// Case-insensitive marker test.
pub fn contains_marker(body: &str, marker: &str) -> bool {
    body.to_lowercase().contains(&marker.to_lowercase())
}

/// A polling phase of the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    AwaitFirstPrompt,
    AwaitLastPrompt,
    AwaitSendPrompt,
    AwaitIssuedLink,
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakePhase::AwaitFirstPrompt => "await_first_prompt",
            HandshakePhase::AwaitLastPrompt => "await_last_prompt",
            HandshakePhase::AwaitSendPrompt => "await_send_prompt",
            HandshakePhase::AwaitIssuedLink => "await_issued_link",
        };
        f.write_str(name)
    }
}

/// Errors that end a handshake
#[derive(Error, Debug, Clone)]
pub enum NegotiationError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no qualifying reply during {phase} after {attempts} attempts")]
    Timeout { phase: HandshakePhase, attempts: u32 },
}

/// What to negotiate a link for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeRequest {
    /// Several uploads, identified by the links of the first and last one
    Batch { first_link: String, last_link: String },
    /// One upload, forwarded to the agent as is
    Single { from_chat: ChatId, message_id: MessageId },
}

/// Outcome of a handshake; `None` means negotiation failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeResult {
    pub issued_link: Option<String>,
}

/// Drives the handshake with the link-issuing agent
pub struct LinkNegotiator {
    transport: DynTransport,
    agent_handle: String,
    poll_interval: Duration,
    max_attempts: u32,
}

impl LinkNegotiator {
    pub fn new(transport: DynTransport, agent_handle: impl Into<String>, config: &NegotiationConfig) -> Self {
        Self {
            transport,
            agent_handle: agent_handle.into(),
            poll_interval: config.poll_interval(),
            max_attempts: config.max_attempts,
        }
    }

    /// Run the handshake for `request`, logging any failure.
    pub async fn negotiate(&self, request: &HandshakeRequest) -> HandshakeResult {
        let outcome = match request {
            HandshakeRequest::Batch { first_link, last_link } => {
                self.negotiate_batch(first_link, last_link).await
            }
            HandshakeRequest::Single { from_chat, message_id } => {
                self.negotiate_single(*from_chat, *message_id).await
            }
        };
        match outcome {
            Ok(link) => HandshakeResult { issued_link: Some(link) },
            Err(e) => {
                tracing::error!(agent = %self.agent_handle, error = %e, "link negotiation failed");
                HandshakeResult::default()
            }
        }
    }

    /// Batch handshake: the agent receives the first and last public links.
    pub async fn negotiate_batch(&self, first_link: &str, last_link: &str) -> Result<String, NegotiationError> {
        let agent = self.resolve().await?;
        tracing::info!(agent = %agent.handle, "starting batch handshake");

        let sent = self.transport.send_message(agent.id, BATCH_COMMAND).await?;
        self.wait_for_marker(&agent, sent, FIRST_MESSAGE_MARKER, HandshakePhase::AwaitFirstPrompt)
            .await?;

        let sent = self.transport.send_message(agent.id, first_link).await?;
        self.wait_for_marker(&agent, sent, LAST_MESSAGE_MARKER, HandshakePhase::AwaitLastPrompt)
            .await?;

        let sent = self.transport.send_message(agent.id, last_link).await?;
        self.wait_for_link(&agent, sent).await
    }

    /// Single handshake: the uploaded message itself is forwarded.
    pub async fn negotiate_single(&self, from_chat: ChatId, message_id: MessageId) -> Result<String, NegotiationError> {
        let agent = self.resolve().await?;
        tracing::info!(agent = %agent.handle, message_id, "starting single handshake");

        let sent = self.transport.send_message(agent.id, SINGLE_COMMAND).await?;
        self.wait_for_marker(&agent, sent, SEND_MARKER, HandshakePhase::AwaitSendPrompt)
            .await?;

        let sent = self
            .transport
            .forward_message(agent.id, from_chat, message_id)
            .await?;
        self.wait_for_link(&agent, sent).await
    }

    async fn resolve(&self) -> Result<Entity, NegotiationError> {
        Ok(self.transport.resolve_entity(&self.agent_handle).await?)
    }

    async fn wait_for_marker(
        &self,
        agent: &Entity,
        after: MessageId,
        marker: &str,
        phase: HandshakePhase,
    ) -> Result<(), NegotiationError> {
        self.poll(agent, after, phase, |body| contains_marker(body, marker).then_some(()))
            .await
    }

    async fn wait_for_link(&self, agent: &Entity, after: MessageId) -> Result<String, NegotiationError> {
        self.poll(agent, after, HandshakePhase::AwaitIssuedLink, extract_issued_link)
            .await
    }

    /// Poll the agent's latest message until `accept` yields a value.
    ///
    /// Only a reply authored by the agent and newer than `after` is
    /// considered; anything older belongs to a previous step.
    async fn poll<T>(
        &self,
        agent: &Entity,
        after: MessageId,
        phase: HandshakePhase,
        accept: impl Fn(&str) -> Option<T>,
    ) -> Result<T, NegotiationError> {
        for attempt in 1..=self.max_attempts {
            tokio::time::sleep(self.poll_interval).await;

            let latest = match self.transport.recent_messages(agent.id, 1).await {
                Ok(messages) => messages.into_iter().next(),
                Err(e) => {
                    tracing::warn!(%phase, attempt, error = %e, "failed to read agent reply");
                    continue;
                }
            };

            if let Some(value) = latest.as_ref().filter(|m| is_fresh_reply(m, after)).and_then(|m| accept(&m.text)) {
                tracing::debug!(%phase, attempt, "agent reply accepted");
                return Ok(value);
            }
            tracing::trace!(%phase, attempt, "no qualifying reply yet");
        }

        Err(NegotiationError::Timeout {
            phase,
            attempts: self.max_attempts,
        })
    }
}

fn is_fresh_reply(message: &InboundMessage, after: MessageId) -> bool {
    !message.outgoing && message.id > after
}
