//! Fakes for the collaborator traits, shared by the unit tests of this crate.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::{
    domain::{Jid, MessageId},
    protocol::{
        AuthMaterial, BotIdentity, ConnectionUpdate, GroupMetadata, GroupParticipant,
        MessageContent, MessageKey, MessageUpdate, OutboundMessage, SessionEvent, UpsertKind,
        WireMessage,
    },
};
use storage::{MessageHistory, StoredMessage};
use tokio::sync::{mpsc, Mutex};

use crate::{
    config::CoreConfig,
    context::{BotContext, Collaborators},
    credentials::CredentialStore,
    error::ConnectError,
    handler::{AntiDelete, MessageHandler},
    maintenance::{MemoryProbe, BYTES_PER_MB},
    message::InboundMessage,
    transport::{Session, SessionConnector, SessionHandle},
};

pub const BOT_JID: &str = "999@s.whatsapp.net";

#[derive(Default)]
pub struct FakeSession {
    groups: HashMap<Jid, GroupMetadata>,
    fail_send: bool,
    sent: Mutex<Vec<(Jid, OutboundMessage)>>,
    metadata_fetches: AtomicUsize,
    all_group_fetches: AtomicUsize,
    closes: AtomicUsize,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_sends() -> Self {
        Self {
            fail_send: true,
            ..Self::default()
        }
    }

    pub fn with_group(mut self, metadata: GroupMetadata) -> Self {
        self.groups.insert(metadata.id.clone(), metadata);
        self
    }

    pub async fn sent(&self) -> Vec<(Jid, OutboundMessage)> {
        self.sent.lock().await.clone()
    }

    pub fn metadata_fetches(&self) -> usize {
        self.metadata_fetches.load(Ordering::SeqCst)
    }

    pub fn all_group_fetches(&self) -> usize {
        self.all_group_fetches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn send_message(&self, to: &Jid, message: OutboundMessage) -> Result<MessageId> {
        if self.fail_send {
            return Err(anyhow!("send refused"));
        }
        let mut sent = self.sent.lock().await;
        sent.push((to.clone(), message));
        Ok(MessageId::new(format!("sent-{}", sent.len())))
    }

    async fn fetch_group_metadata(&self, group: &Jid) -> Result<GroupMetadata> {
        self.metadata_fetches.fetch_add(1, Ordering::SeqCst);
        self.groups
            .get(group)
            .cloned()
            .ok_or_else(|| anyhow!("group {group} not found"))
    }

    async fn fetch_all_groups(&self) -> Result<Vec<GroupMetadata>> {
        self.all_group_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.groups.values().cloned().collect())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One scripted answer of [`ScriptedConnector`].
pub enum Script {
    Fail(ConnectError),
    /// Opens a session that delivers `events`; with `hold` the stream stays open
    /// afterwards, otherwise it ends.
    Events { events: Vec<SessionEvent>, hold: bool },
}

/// Replays scripted connect outcomes; once the script runs out every connect fails.
pub struct ScriptedConnector {
    session: Arc<FakeSession>,
    script: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
    held: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl ScriptedConnector {
    pub fn new(session: Arc<FakeSession>, script: Vec<Script>) -> Self {
        Self {
            session,
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            tokens: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().await.clone()
    }
}

#[async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(&self, auth: Option<AuthMaterial>) -> Result<SessionHandle, ConnectError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .await
            .push(auth.as_ref().map(|auth| auth.token.clone()));

        let next = self.script.lock().await.pop_front();
        match next {
            None => Err(ConnectError::Network(anyhow!("gateway unreachable"))),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Events { events, hold }) => {
                let (tx, rx) = mpsc::channel(events.len().max(1) + 8);
                for event in events {
                    tx.send(event)
                        .await
                        .map_err(|_| ConnectError::Network(anyhow!("event channel closed")))?;
                }
                if hold {
                    self.held.lock().await.push(tx);
                }
                Ok(SessionHandle {
                    session: Arc::clone(&self.session) as Arc<dyn Session>,
                    events: rx,
                })
            }
        }
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    stored: Mutex<Option<AuthMaterial>>,
    fail_save: bool,
    saves: AtomicUsize,
    clears: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn with_token(token: &str) -> Self {
        Self {
            stored: Mutex::new(Some(AuthMaterial::new(token))),
            ..Self::default()
        }
    }

    pub fn failing_saves(token: &str) -> Self {
        Self {
            fail_save: true,
            ..Self::with_token(token)
        }
    }

    pub async fn token(&self) -> Option<String> {
        self.stored.lock().await.as_ref().map(|auth| auth.token.clone())
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<AuthMaterial>> {
        Ok(self.stored.lock().await.clone())
    }

    async fn save(&self, auth: &AuthMaterial) -> Result<()> {
        if self.fail_save {
            return Err(anyhow!("disk full"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.stored.lock().await = Some(auth.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.stored.lock().await = None;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<InboundMessage>>,
    fail_on_text: Option<String>,
    stall: Option<Duration>,
}

impl RecordingHandler {
    pub fn failing_on(text: &str) -> Self {
        Self {
            fail_on_text: Some(text.to_string()),
            ..Self::default()
        }
    }

    pub fn stalling(stall: Duration) -> Self {
        Self {
            stall: Some(stall),
            ..Self::default()
        }
    }

    pub async fn seen(&self) -> Vec<InboundMessage> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, _session: &dyn Session, message: &InboundMessage) -> Result<()> {
        self.seen.lock().await.push(message.clone());
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }
        if self.fail_on_text.as_deref().is_some_and(|text| message.text() == Some(text)) {
            return Err(anyhow!("handler exploded"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAntiDelete {
    seen: Mutex<Vec<MessageId>>,
    fail_on: Option<MessageId>,
}

impl RecordingAntiDelete {
    pub fn failing_on(id: &str) -> Self {
        Self {
            fail_on: Some(MessageId::from(id)),
            ..Self::default()
        }
    }

    pub async fn seen(&self) -> Vec<MessageId> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl AntiDelete for RecordingAntiDelete {
    async fn on_removal(
        &self,
        _session: &dyn Session,
        update: &MessageUpdate,
        _history: &dyn MessageHistory,
    ) -> Result<()> {
        self.seen.lock().await.push(update.key.id.clone());
        if self.fail_on.as_ref() == Some(&update.key.id) {
            return Err(anyhow!("relay failed"));
        }
        Ok(())
    }
}

/// Message history kept in a map; no I/O, so it is safe under paused time.
#[derive(Default)]
pub struct MemoryHistory {
    messages: Mutex<HashMap<MessageId, StoredMessage>>,
    fail_record: bool,
}

impl MemoryHistory {
    pub fn failing_records() -> Self {
        Self {
            fail_record: true,
            ..Self::default()
        }
    }

    pub async fn stored(&self, id: &str) -> Option<StoredMessage> {
        self.messages.lock().await.get(&MessageId::from(id)).cloned()
    }
}

#[async_trait]
impl MessageHistory for MemoryHistory {
    async fn record_message(&self, message: &WireMessage) -> Result<()> {
        if self.fail_record {
            return Err(anyhow!("history unavailable"));
        }
        let sent_at = message
            .timestamp
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);
        self.messages
            .lock()
            .await
            .entry(message.key.id.clone())
            .or_insert_with(|| StoredMessage {
                message_id: message.key.id.clone(),
                chat: message.key.remote_jid.clone(),
                sender: message.key.sender().clone(),
                push_name: message.push_name.clone(),
                from_me: message.key.from_me,
                content: message.content.clone(),
                sent_at,
                deleted_at: None,
            });
        Ok(())
    }

    async fn load_message(&self, message_id: &MessageId) -> Result<Option<StoredMessage>> {
        Ok(self.messages.lock().await.get(message_id).cloned())
    }

    async fn mark_deleted(&self, message_id: &MessageId) -> Result<bool> {
        let mut messages = self.messages.lock().await;
        let Some(stored) = messages.get_mut(message_id) else {
            return Ok(false);
        };
        stored.deleted_at.get_or_insert_with(Utc::now);
        Ok(true)
    }
}

/// Reports a fixed resident size, stored in bytes.
pub struct FixedProbe(AtomicU64);

impl FixedProbe {
    pub fn new(mb: u64) -> Self {
        Self(AtomicU64::new(mb * BYTES_PER_MB))
    }

    pub fn set(&self, mb: u64) {
        self.set_bytes(mb * BYTES_PER_MB);
    }

    pub fn set_bytes(&self, bytes: u64) {
        self.0.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FixedProbe {
    fn sample_bytes(&self) -> Result<u64> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

/// A context wired to in-memory fakes, with handles to inspect them.
pub struct TestBed {
    pub ctx: Arc<BotContext>,
    pub credentials: Arc<MemoryCredentialStore>,
    pub history: Arc<MemoryHistory>,
    pub handler: Arc<RecordingHandler>,
    pub anti_delete: Arc<RecordingAntiDelete>,
}

impl TestBed {
    pub async fn new(config: CoreConfig) -> Self {
        Self::with(
            config,
            MemoryCredentialStore::with_token("token-1"),
            RecordingHandler::default(),
            RecordingAntiDelete::default(),
            MemoryHistory::default(),
        )
        .await
    }

    pub async fn with(
        config: CoreConfig,
        credentials: MemoryCredentialStore,
        handler: RecordingHandler,
        anti_delete: RecordingAntiDelete,
        history: MemoryHistory,
    ) -> Self {
        let credentials = Arc::new(credentials);
        let history = Arc::new(history);
        let handler = Arc::new(handler);
        let anti_delete = Arc::new(anti_delete);
        let collaborators = Collaborators::new(
            Arc::clone(&credentials) as Arc<dyn CredentialStore>,
            Arc::clone(&history) as Arc<dyn MessageHistory>,
        )
        .with_handler(Arc::clone(&handler) as Arc<dyn MessageHandler>)
        .with_anti_delete(Arc::clone(&anti_delete) as Arc<dyn AntiDelete>);

        Self {
            ctx: BotContext::new(config, collaborators),
            credentials,
            history,
            handler,
            anti_delete,
        }
    }
}

pub fn text_message(id: &str, chat: &str, participant: Option<&str>, text: &str) -> WireMessage {
    WireMessage {
        key: MessageKey {
            id: MessageId::from(id),
            remote_jid: Jid::from(chat),
            from_me: false,
            participant: participant.map(Jid::from),
        },
        push_name: Some("Ada".to_string()),
        timestamp: Some(1_700_000_000),
        content: Some(MessageContent::Text {
            text: text.to_string(),
        }),
    }
}

pub fn live(messages: Vec<WireMessage>) -> SessionEvent {
    SessionEvent::MessagesUpsert {
        kind: UpsertKind::Notify,
        messages,
    }
}

pub fn group(id: &str, members: &[&str]) -> GroupMetadata {
    GroupMetadata {
        id: Jid::from(id),
        subject: "Book club".to_string(),
        owner: None,
        description: None,
        participants: members
            .iter()
            .map(|jid| GroupParticipant {
                jid: Jid::from(*jid),
                role: Default::default(),
            })
            .collect(),
        announce: false,
        restrict: false,
    }
}

pub fn opened() -> SessionEvent {
    SessionEvent::ConnectionUpdate(ConnectionUpdate::Open {
        me: BotIdentity {
            jid: Jid::from(BOT_JID),
            name: Some("Tracer".to_string()),
        },
    })
}

pub fn closed(status_code: u16) -> SessionEvent {
    SessionEvent::ConnectionUpdate(ConnectionUpdate::Close {
        status_code: Some(status_code),
    })
}
