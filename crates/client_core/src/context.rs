use std::sync::Arc;

use shared::{domain::Jid, protocol::DisconnectReason};
use storage::MessageHistory;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    config::CoreConfig,
    connection::{ConnectionState, ConnectionStateMachine},
    coordinator::{CacheCoordinator, CacheStats, ClearScope},
    credentials::CredentialStore,
    dedup::DedupFilter,
    handler::{AntiDelete, DisabledAntiDelete, LoggingMessageHandler, MessageHandler},
    transport::Session,
};

/// Why every cache domain was dropped at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearCause {
    /// Credentials were invalidated.
    SessionWipe,
    /// Too many reconnects without a successful open.
    ReconnectStorm,
    MemoryPressure,
}

/// Advisory notifications for whoever is listening. Nobody has to be.
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    Connected {
        me: Jid,
    },
    Disconnected {
        reason: DisconnectReason,
        attempts: u32,
    },
    CachesCleared {
        cause: ClearCause,
        removed: usize,
    },
    StatsReported {
        stats: CacheStats,
        memory_mb: Option<u64>,
    },
    MemoryPressure {
        sampled_mb: u64,
        threshold_mb: u64,
    },
}

/// External collaborators the core drives.
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub history: Arc<dyn MessageHistory>,
    pub handler: Arc<dyn MessageHandler>,
    pub anti_delete: Arc<dyn AntiDelete>,
}

impl Collaborators {
    /// Logging handler and no anti-delete relay.
    pub fn new(credentials: Arc<dyn CredentialStore>, history: Arc<dyn MessageHistory>) -> Self {
        Self {
            credentials,
            history,
            handler: Arc::new(LoggingMessageHandler),
            anti_delete: Arc::new(DisabledAntiDelete),
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn with_anti_delete(mut self, anti_delete: Arc<dyn AntiDelete>) -> Self {
        self.anti_delete = anti_delete;
        self
    }
}

/// Shared state of one bot process, built once at startup and handed to every component.
pub struct BotContext {
    config: CoreConfig,
    caches: Arc<CacheCoordinator>,
    dedup: DedupFilter,
    collaborators: Collaborators,
    session: RwLock<Option<Arc<dyn Session>>>,
    connection: Mutex<ConnectionStateMachine>,
    events: broadcast::Sender<BotEvent>,
}

impl BotContext {
    pub fn new(config: CoreConfig, collaborators: Collaborators) -> Arc<Self> {
        let caches = Arc::new(CacheCoordinator::new(&config.cache));
        let (events, _) = broadcast::channel(config.router.event_buffer.max(1));
        Arc::new(Self {
            dedup: DedupFilter::new(Arc::clone(&caches)),
            connection: Mutex::new(ConnectionStateMachine::new(config.reconnect.clone())),
            config,
            caches,
            collaborators,
            session: RwLock::new(None),
            events,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<CacheCoordinator> {
        &self.caches
    }

    pub fn dedup(&self) -> &DedupFilter {
        &self.dedup
    }

    pub fn credentials(&self) -> &dyn CredentialStore {
        self.collaborators.credentials.as_ref()
    }

    pub fn history(&self) -> &dyn MessageHistory {
        self.collaborators.history.as_ref()
    }

    pub fn handler(&self) -> &dyn MessageHandler {
        self.collaborators.handler.as_ref()
    }

    pub fn anti_delete(&self) -> &dyn AntiDelete {
        self.collaborators.anti_delete.as_ref()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BotEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: BotEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn connection(&self) -> &Mutex<ConnectionStateMachine> {
        &self.connection
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.lock().await.state()
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.connection.lock().await.reconnect_attempts()
    }

    /// The current session, if one is open. Never returns a handle that was replaced.
    pub async fn live_session(&self) -> Option<Arc<dyn Session>> {
        self.session.read().await.clone()
    }

    pub(crate) async fn attach_session(&self, session: Arc<dyn Session>) {
        *self.session.write().await = Some(session);
    }

    pub(crate) async fn detach_session(&self) -> Option<Arc<dyn Session>> {
        self.session.write().await.take()
    }

    /// Drops every cache domain and reports it.
    pub fn emergency_clear(&self, cause: ClearCause) -> usize {
        let removed = self.caches.clear(ClearScope::All);
        match cause {
            ClearCause::SessionWipe => info!(removed, "caches cleared after session wipe"),
            ClearCause::ReconnectStorm | ClearCause::MemoryPressure => {
                warn!(?cause, removed, "emergency cache clear")
            }
        }
        self.emit(BotEvent::CachesCleared { cause, removed });
        removed
    }
}
