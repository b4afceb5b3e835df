//! Session coordinator
//!
//! Owns the single relay session and its state machine:
//!
//! ```text
//! Idle ──trigger──▶ Collecting ──window closes──▶ Dispatching ──done──▶ Idle
//! ```
//!
//! All mutation goes through one intent queue consumed by one task. Inbound
//! messages, group scans, the collection timer and the dispatch task only
//! ever post intents, so an append can never race the window closing: once
//! the close intent is handled, later arrivals are dropped.

pub mod dispatch;
pub mod trigger;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ConfigError};
use crate::media::MediaRef;
use crate::transport::{ChatId, DynTransport, GroupId, InboundMessage, MessageId};

pub use dispatch::{DispatchJob, DispatchOutcome, DispatchPath, Dispatcher};
pub use trigger::{detect_single, extract_trigger, find_group_trigger, TriggerCandidate, TriggerRef};

/// Number of recently seen media groups remembered for de-duplication.
const GROUP_MEMORY: usize = 1024;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Collecting,
    Dispatching,
}

/// The unit of work for one trigger
#[derive(Debug, Clone)]
pub struct Session {
    pub id: u64,
    pub reference: TriggerRef,
    pub trigger_chat: ChatId,
    pub trigger_message_id: MessageId,
    pub original_caption: String,
    /// Delivery agent whose media is collected
    pub expected_sender_id: ChatId,
    pub collected: Vec<MediaRef>,
    pub opened_at: Instant,
}

impl Session {
    /// Whether `message` is a delivery from this session's agent.
    pub fn accepts(&self, message: &InboundMessage) -> bool {
        !message.outgoing && message.sender_id == Some(self.expected_sender_id) && message.has_media()
    }
}

/// Observable coordinator status
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorStatus {
    pub state: SessionState,
    pub session_id: Option<u64>,
    pub collected: usize,
    /// Sessions that reached dispatch and returned to idle
    pub completed_sessions: u64,
    pub last_outcome: Option<DispatchOutcome>,
}

impl Default for CoordinatorStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            collected: 0,
            completed_sessions: 0,
            last_outcome: None,
        }
    }
}

/// Timing and scope of the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSettings {
    /// Channel watched for triggers and receiving uploads
    pub channel_id: ChatId,
    pub poll_interval: Duration,
    pub collection_window: Duration,
    pub group_settle: Duration,
    pub group_scan_limit: usize,
    /// Bound on each transport call made while opening a session
    pub trigger_timeout: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let channel_id = config
            .channel
            .target_channel_id
            .ok_or_else(|| ConfigError::Invalid("channel.targetChannelId is required".to_string()))?;
        Ok(Self {
            channel_id,
            poll_interval: config.session.poll_interval(),
            collection_window: config.session.collection_window(),
            group_settle: config.session.group_settle(),
            group_scan_limit: config.session.group_scan_limit,
            trigger_timeout: config.session.trigger_timeout(),
        })
    }
}

enum Intent {
    Inbound(InboundMessage),
    Trigger(TriggerCandidate),
    CloseCollection { session_id: u64 },
    DispatchFinished { session_id: u64, outcome: DispatchOutcome },
}

/// Bounded set of media groups already handled
struct GroupMemory {
    seen: HashSet<GroupId>,
    order: VecDeque<GroupId>,
    capacity: usize,
}

impl GroupMemory {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Returns `true` the first time `group` is seen.
    fn insert(&mut self, group: GroupId) -> bool {
        if !self.seen.insert(group) {
            return false;
        }
        self.order.push_back(group);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }
}

/// Handle used by the embedding application to feed and observe the
/// coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    intents: mpsc::UnboundedSender<Intent>,
    status: watch::Receiver<CoordinatorStatus>,
    shutdown: CancellationToken,
}

impl CoordinatorHandle {
    /// Submit an inbound transport message. Returns `false` once the
    /// coordinator has stopped.
    pub fn ingest(&self, message: InboundMessage) -> bool {
        self.intents.send(Intent::Inbound(message)).is_ok()
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorStatus> {
        self.status.clone()
    }

    /// Stop the coordinator and any pending collection timer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Single-writer owner of the relay session
pub struct SessionCoordinator {
    settings: CoordinatorSettings,
    transport: DynTransport,
    dispatcher: Arc<Dispatcher>,
    intents_tx: mpsc::UnboundedSender<Intent>,
    intents_rx: mpsc::UnboundedReceiver<Intent>,
    status_tx: watch::Sender<CoordinatorStatus>,
    shutdown: CancellationToken,
    state: SessionState,
    session: Option<Session>,
    groups: GroupMemory,
    next_session_id: u64,
}

impl SessionCoordinator {
    /// Start the coordinator task.
    pub fn spawn(
        settings: CoordinatorSettings,
        transport: DynTransport,
        dispatcher: Arc<Dispatcher>,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(CoordinatorStatus::default());
        let shutdown = CancellationToken::new();

        let handle = CoordinatorHandle {
            intents: intents_tx.clone(),
            status: status_rx,
            shutdown: shutdown.clone(),
        };
        let coordinator = Self {
            settings,
            transport,
            dispatcher,
            intents_tx,
            intents_rx,
            status_tx,
            shutdown,
            state: SessionState::Idle,
            session: None,
            groups: GroupMemory::new(GROUP_MEMORY),
            next_session_id: 1,
        };
        (handle, tokio::spawn(coordinator.run()))
    }

    async fn run(mut self) {
        tracing::info!(channel_id = self.settings.channel_id, "session coordinator started");
        loop {
            let intent = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                intent = self.intents_rx.recv() => intent,
            };
            let Some(intent) = intent else { break };

            match intent {
                Intent::Inbound(message) => self.on_inbound(message).await,
                Intent::Trigger(candidate) => self.on_trigger(candidate).await,
                Intent::CloseCollection { session_id } => self.on_close(session_id),
                Intent::DispatchFinished { session_id, outcome } => self.on_finished(session_id, outcome),
            }
        }
        tracing::info!("session coordinator stopped");
    }

    async fn on_inbound(&mut self, message: InboundMessage) {
        if message.chat_id == self.settings.channel_id {
            if let Some(group) = message.grouped_id {
                if self.groups.insert(group) {
                    self.scan_group(group);
                }
            } else if let Some(candidate) = trigger::detect_single(&message) {
                self.on_trigger(candidate).await;
            }
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.accepts(&message) {
            return;
        }
        if self.state != SessionState::Collecting {
            tracing::debug!(session_id = session.id, message_id = message.id, "dropping late arrival");
            return;
        }

        let order = session.collected.len();
        tracing::info!(session_id = session.id, message_id = message.id, order, "collected media");
        session.collected.push(MediaRef { message, order });
        let collected = session.collected.len();
        self.status_tx.send_modify(|status| status.collected = collected);
    }

    /// Enumerate a media group once its members have had time to arrive.
    fn scan_group(&self, group: GroupId) {
        let transport = self.transport.clone();
        let intents = self.intents_tx.clone();
        let channel_id = self.settings.channel_id;
        let settle = self.settings.group_settle;
        let limit = self.settings.group_scan_limit;
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(settle) => {}
            }
            match transport.recent_messages(channel_id, limit).await {
                Ok(messages) => match trigger::find_group_trigger(&messages, group) {
                    Some(candidate) => {
                        let _ = intents.send(Intent::Trigger(candidate));
                    }
                    None => tracing::debug!(group, "media group carries no trigger"),
                },
                Err(e) => tracing::error!(group, error = %e, "failed to enumerate media group"),
            }
        });
    }

    async fn on_trigger(&mut self, candidate: TriggerCandidate) {
        if self.state != SessionState::Idle {
            tracing::warn!(
                state = ?self.state,
                message_id = candidate.message_id,
                "session already active, ignoring trigger"
            );
            return;
        }

        // Both calls run on the intent loop and are bounded.
        let limit = self.settings.trigger_timeout;
        let handle = candidate.reference.agent_handle();
        let agent = match timeout(limit, self.transport.resolve_entity(&handle)).await {
            Ok(Ok(agent)) => agent,
            Ok(Err(e)) => {
                tracing::error!(agent = %handle, error = %e, "failed to resolve delivery agent");
                return;
            }
            Err(_) => {
                tracing::error!(agent = %handle, ?limit, "timed out resolving delivery agent");
                return;
            }
        };
        let start_command = candidate.reference.start_command();
        match timeout(limit, self.transport.send_message(agent.id, &start_command)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::error!(agent = %handle, error = %e, "failed to send start command");
                return;
            }
            Err(_) => {
                tracing::error!(agent = %handle, ?limit, "timed out sending start command");
                return;
            }
        }

        let session_id = self.next_session_id;
        self.next_session_id += 1;
        tracing::info!(
            session_id,
            agent = %handle,
            message_id = candidate.message_id,
            "collection started"
        );
        tracing::debug!(session_id, caption = %candidate.caption, "original caption");

        self.session = Some(Session {
            id: session_id,
            reference: candidate.reference,
            trigger_chat: candidate.chat_id,
            trigger_message_id: candidate.message_id,
            original_caption: candidate.caption,
            expected_sender_id: agent.id,
            collected: Vec::new(),
            opened_at: Instant::now(),
        });
        self.state = SessionState::Collecting;
        self.status_tx.send_modify(|status| {
            status.state = SessionState::Collecting;
            status.session_id = Some(session_id);
            status.collected = 0;
        });
        self.start_window_timer(session_id);
    }

    /// Poll at the configured cadence until the window is exceeded, then
    /// ask the coordinator to close collection.
    fn start_window_timer(&self, session_id: u64) {
        let intents = self.intents_tx.clone();
        let poll = self.settings.poll_interval;
        let window = self.settings.collection_window;
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let opened = Instant::now();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(poll) => {}
                }
                if opened.elapsed() > window {
                    let _ = intents.send(Intent::CloseCollection { session_id });
                    return;
                }
            }
        });
    }

    fn on_close(&mut self, session_id: u64) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == session_id) else {
            return;
        };
        if self.state != SessionState::Collecting {
            return;
        }

        let items = std::mem::take(&mut session.collected);
        tracing::info!(
            session_id,
            items = items.len(),
            elapsed_secs = session.opened_at.elapsed().as_secs(),
            "collection window closed"
        );
        let job = DispatchJob {
            session_id,
            trigger_chat: session.trigger_chat,
            trigger_message_id: session.trigger_message_id,
            items,
        };

        self.state = SessionState::Dispatching;
        self.status_tx.send_modify(|status| status.state = SessionState::Dispatching);

        let dispatcher = self.dispatcher.clone();
        let intents = self.intents_tx.clone();
        tokio::spawn(async move {
            let run = tokio::spawn(async move { dispatcher.dispatch(job).await });
            let outcome = match run.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(session_id, error = %e, "dispatch task failed");
                    DispatchOutcome::Aborted { reason: e.to_string() }
                }
            };
            let _ = intents.send(Intent::DispatchFinished { session_id, outcome });
        });
    }

    fn on_finished(&mut self, session_id: u64, outcome: DispatchOutcome) {
        if self.session.as_ref().map(|s| s.id) != Some(session_id) {
            return;
        }
        tracing::info!(session_id, ?outcome, "session finished");
        self.session = None;
        self.state = SessionState::Idle;
        self.status_tx.send_modify(|status| {
            status.state = SessionState::Idle;
            status.session_id = None;
            status.collected = 0;
            status.completed_sessions += 1;
            status.last_outcome = Some(outcome);
        });
    }
}
