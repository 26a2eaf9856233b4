use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use shared::protocol::{
    BotIdentity, ConnectionUpdate, DisconnectReason, OutboundMessage, SessionEvent,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    config::ReconnectConfig,
    context::{BotContext, BotEvent, ClearCause},
    error::ConnectError,
    router::EventRouter,
    transport::{Session, SessionConnector, SessionHandle},
    types::UserRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

/// What the supervisor has to do after a session ended or failed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Reconnect {
        delay: Duration,
        /// Discard credentials and every cache domain before reconnecting.
        wipe: bool,
        /// The attempt cap was exceeded; drop every cache domain.
        emergency_clear: bool,
    },
    /// A reconnect is already pending; nothing new is scheduled.
    AlreadyScheduled,
    Stop,
}

impl Disposition {
    /// How long to wait before the next connect attempt; `None` ends the loop.
    /// `AlreadyScheduled` waits `base` so a stray close never reconnects immediately.
    pub fn pause(&self, base: Duration) -> Option<Duration> {
        match self {
            Self::Reconnect { delay, .. } => Some(*delay),
            Self::AlreadyScheduled => Some(base),
            Self::Stop => None,
        }
    }
}

/// Pure bookkeeping of connection state and reconnect attempts.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    config: ReconnectConfig,
    state: ConnectionState,
    reconnect_attempts: u32,
    last_connected_at: Option<DateTime<Utc>>,
    reconnect_pending: bool,
}

impl ConnectionStateMachine {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            last_connected_at: None,
            reconnect_pending: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.last_connected_at
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Moves to `Connecting`. Refused once shutdown has begun.
    pub fn begin_connect(&mut self) -> bool {
        if self.state == ConnectionState::Closing {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.reconnect_pending = false;
        true
    }

    pub fn on_open(&mut self, at: DateTime<Utc>) {
        if self.state == ConnectionState::Closing {
            return;
        }
        self.state = ConnectionState::Connected;
        self.reconnect_attempts = 0;
        self.last_connected_at = Some(at);
        self.reconnect_pending = false;
    }

    pub fn on_close(&mut self, reason: DisconnectReason) -> Disposition {
        self.settle(self.config.delay, reason.requires_wipe())
    }

    /// A connect attempt failed before any session opened.
    pub fn on_connect_failed(&mut self, err: &ConnectError) -> Disposition {
        if matches!(err, ConnectError::MissingCredentials) {
            if self.state != ConnectionState::Closing {
                self.state = ConnectionState::Disconnected;
            }
            return Disposition::Stop;
        }
        self.settle(self.config.startup_retry_delay, err.invalidates_session())
    }

    pub fn begin_shutdown(&mut self) {
        self.state = ConnectionState::Closing;
        self.reconnect_pending = false;
    }

    fn settle(&mut self, base: Duration, wipe: bool) -> Disposition {
        if self.state == ConnectionState::Closing {
            return Disposition::Stop;
        }
        if self.reconnect_pending {
            return Disposition::AlreadyScheduled;
        }
        self.state = ConnectionState::Disconnected;
        self.reconnect_pending = true;

        if wipe {
            return Disposition::Reconnect {
                delay: base,
                wipe: true,
                emergency_clear: false,
            };
        }

        self.reconnect_attempts += 1;
        let delay = self.config.delay_for(base, self.reconnect_attempts);
        let emergency_clear = self.reconnect_attempts > self.config.max_attempts;
        if emergency_clear {
            self.reconnect_attempts = 0;
        }
        Disposition::Reconnect {
            delay,
            wipe: false,
            emergency_clear,
        }
    }
}

/// Keeps one session alive: connects, pumps its events into the router, and decides
/// how to recover when it ends.
pub struct ConnectionSupervisor {
    ctx: Arc<BotContext>,
    connector: Arc<dyn SessionConnector>,
    router: EventRouter,
}

impl ConnectionSupervisor {
    pub fn new(ctx: Arc<BotContext>, connector: Arc<dyn SessionConnector>) -> Self {
        let router = EventRouter::new(Arc::clone(&ctx));
        Self {
            ctx,
            connector,
            router,
        }
    }

    /// Runs until `shutdown` flips to true. Returns an error only when the bot can
    /// never connect, i.e. credentials are missing and interactive auth is off.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let outcome = self.run_loop(&mut shutdown).await;
        self.close().await;
        outcome
    }

    async fn run_loop(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            if !self.ctx.connection().lock().await.begin_connect() {
                return Ok(());
            }
            info!("connecting to messaging network");

            let disposition = match self.connect_once().await {
                Ok(handle) => {
                    let Some(reason) = self.drive(handle, shutdown).await else {
                        return Ok(());
                    };
                    if let Some(stale) = self.ctx.detach_session().await {
                        if let Err(err) = stale.close().await {
                            debug!(error = %err, "closing ended session failed");
                        }
                    }
                    let mut connection = self.ctx.connection().lock().await;
                    let disposition = connection.on_close(reason);
                    let attempts = connection.reconnect_attempts();
                    drop(connection);
                    warn!(%reason, code = ?reason.status_code(), attempts, "connection closed");
                    self.ctx.emit(BotEvent::Disconnected { reason, attempts });
                    disposition
                }
                Err(err) => {
                    let disposition = self.ctx.connection().lock().await.on_connect_failed(&err);
                    if disposition == Disposition::Stop && !*shutdown.borrow() {
                        error!(%err, "cannot connect");
                        return Err(err.into());
                    }
                    warn!(%err, "connect attempt failed");
                    disposition
                }
            };

            match disposition {
                Disposition::Reconnect {
                    wipe,
                    emergency_clear,
                    ..
                } => {
                    if wipe {
                        self.wipe_session().await;
                    }
                    if emergency_clear {
                        warn!("too many reconnection attempts");
                        self.ctx.emergency_clear(ClearCause::ReconnectStorm);
                    }
                }
                // begin_connect clears the pending flag, so this only follows a
                // close reported twice for the same session.
                Disposition::AlreadyScheduled => debug!("reconnect already scheduled"),
                Disposition::Stop => {}
            }
            let Some(delay) = disposition.pause(self.ctx.config().reconnect.delay) else {
                return Ok(());
            };
            let attempt = self.ctx.reconnect_attempts().await;
            info!(attempt, ?delay, "reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(shutdown) => return Ok(()),
            }
        }
    }

    async fn connect_once(&self) -> Result<SessionHandle, ConnectError> {
        let auth = self.ctx.credentials().load().await?;
        if auth.is_none() && !self.ctx.config().interactive_auth {
            return Err(ConnectError::MissingCredentials);
        }
        self.connector.connect(auth).await
    }

    /// Pumps events in arrival order. `None` means shutdown was requested.
    async fn drive(
        &self,
        handle: SessionHandle,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<DisconnectReason> {
        let SessionHandle {
            session,
            mut events,
        } = handle;
        self.ctx.attach_session(Arc::clone(&session)).await;

        loop {
            let event = tokio::select! {
                _ = wait_for_shutdown(shutdown) => return None,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return Some(DisconnectReason::StreamEnded);
            };

            match event {
                SessionEvent::ConnectionUpdate(update) => match update {
                    ConnectionUpdate::Open { me } => self.on_open(session.as_ref(), me).await,
                    ConnectionUpdate::Close { status_code } => {
                        return Some(
                            status_code
                                .map(DisconnectReason::from_status_code)
                                .unwrap_or(DisconnectReason::ConnectionClosed),
                        );
                    }
                    ConnectionUpdate::Qr { code } => {
                        if self.ctx.config().interactive_auth {
                            info!(code_len = code.len(), "pairing code received; scan to link this device");
                        } else {
                            warn!("pairing code received but interactive authentication is disabled");
                        }
                    }
                    ConnectionUpdate::Connecting => debug!("session handshake in progress"),
                },
                other => {
                    if let Err(err) = self.router.route(session.as_ref(), other).await {
                        if err.is_fatal_to_session() {
                            error!(%err, "dropping session");
                            return Some(DisconnectReason::CredentialPersistFailed);
                        }
                        warn!(%err, "event routing failed");
                    }
                }
            }
        }
    }

    async fn on_open(&self, session: &dyn Session, me: BotIdentity) {
        let now = Utc::now();
        self.ctx.connection().lock().await.on_open(now);

        let notify = &self.ctx.config().notify;
        let name = me.name.clone().unwrap_or_else(|| notify.bot_name.clone());
        let mut record = self
            .ctx
            .caches()
            .get_user(&me.jid)
            .unwrap_or_else(|| UserRecord::new(me.jid.clone()));
        record.name = Some(name.clone());
        record.is_bot = true;
        record.connected_at = Some(now);
        self.ctx.caches().set_user(record);

        info!(bot = %name, jid = %me.jid, "connected");
        self.ctx.emit(BotEvent::Connected {
            me: me.jid.clone(),
        });

        if !notify.enabled {
            return;
        }
        let caption = format!(
            "{name} connected successfully\n{}",
            now.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let message = match &notify.image_url {
            Some(url) => OutboundMessage::Image {
                url: url.clone(),
                caption: Some(caption),
            },
            None => OutboundMessage::Text { text: caption },
        };
        match session.send_message(&me.jid, message).await {
            Ok(_) => debug!("connection notification sent"),
            Err(err) => warn!(error = %err, "failed to send connection notification"),
        }
    }

    async fn wipe_session(&self) {
        warn!("clearing session after bad session or logout");
        if let Err(err) = self.ctx.credentials().clear().await {
            error!(error = %err, "failed to remove stored credentials");
        }
        self.ctx.emergency_clear(ClearCause::SessionWipe);
    }

    async fn close(&self) {
        self.ctx.connection().lock().await.begin_shutdown();
        if let Some(session) = self.ctx.detach_session().await {
            if let Err(err) = session.close().await {
                warn!(error = %err, "failed to close session cleanly");
            }
        }
        info!("connection supervisor stopped");
    }
}

/// Resolves once shutdown is requested or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
