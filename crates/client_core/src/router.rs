use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use shared::{
    domain::Jid,
    protocol::{
        AuthMaterial, GroupMetadata, GroupUpdate, MessageUpdate, ParticipantsUpdate, SessionEvent,
        UpsertKind, WireMessage,
    },
};
use tracing::{debug, info, warn};

use crate::{context::BotContext, error::CoreError, message::InboundMessage, transport::Session};

/// Routes session events into the caches and the downstream collaborators.
///
/// Every handler is isolated: its failures are logged and never reach the caller,
/// with the single exception of credential persistence, which ends the session.
pub struct EventRouter {
    ctx: Arc<BotContext>,
}

impl EventRouter {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }

    pub async fn route(&self, session: &dyn Session, event: SessionEvent) -> Result<(), CoreError> {
        let category = event.category();
        debug!(category, "routing session event");
        match event {
            SessionEvent::MessagesUpsert { kind, messages } => {
                self.on_messages_upsert(session, kind, messages).await
            }
            SessionEvent::MessagesUpdate { updates } => {
                self.on_messages_update(session, &updates).await
            }
            SessionEvent::GroupsUpdate { groups } => self.on_groups_update(session, &groups).await,
            SessionEvent::GroupParticipantsUpdate(update) => {
                self.on_participants_update(session, &update).await
            }
            SessionEvent::CredsUpdate(auth) => return self.on_creds_update(&auth).await,
            SessionEvent::ConnectionUpdate(_) => {
                debug!("connection updates belong to the supervisor");
            }
        }
        Ok(())
    }

    async fn on_messages_upsert(
        &self,
        session: &dyn Session,
        kind: UpsertKind,
        messages: Vec<WireMessage>,
    ) {
        if kind != UpsertKind::Notify {
            debug!(?kind, count = messages.len(), "ignoring non-live message batch");
            return;
        }
        let Some(message) = messages.into_iter().next() else {
            return;
        };
        // Must run before any other cache write for this message.
        if self.ctx.dedup().is_duplicate(&message.key.id) {
            return;
        }
        let Some(inbound) = InboundMessage::from_wire(&message) else {
            debug!(message_id = %message.key.id, "message carries no content");
            return;
        };

        if !inbound.from_me {
            self.ctx
                .caches()
                .record_user_message(&inbound.sender, &inbound.push_name, Utc::now());
        }
        if let Err(err) = self.ctx.history().record_message(&message).await {
            warn!(message_id = %inbound.id, error = %err, "failed to record message history");
        }

        info!(
            from = %inbound.push_name,
            sender = %inbound.sender,
            chat = %inbound.chat,
            kind = inbound.kind(),
            at = %inbound.timestamp.format("%H:%M:%S"),
            "incoming message"
        );

        let timeout = self.ctx.config().router.handler_timeout;
        match tokio::time::timeout(timeout, self.ctx.handler().handle(session, &inbound)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let err = CoreError::handler("messages.upsert", err);
                warn!(message_id = %inbound.id, %err, "message handler failed");
            }
            Err(_) => warn!(message_id = %inbound.id, ?timeout, "message handler timed out"),
        }
    }

    async fn on_messages_update(&self, session: &dyn Session, updates: &[MessageUpdate]) {
        let history = self.ctx.history();
        for update in updates.iter().filter(|update| update.is_removal()) {
            let message_id = &update.key.id;
            match history.mark_deleted(message_id).await {
                Ok(true) => debug!(%message_id, "recorded removal"),
                Ok(false) => debug!(%message_id, "removed message is not in history"),
                Err(err) => warn!(%message_id, error = %err, "failed to record removal"),
            }
            if let Err(err) = self
                .ctx
                .anti_delete()
                .on_removal(session, update, history)
                .await
            {
                let err = CoreError::handler("messages.update", err);
                warn!(%message_id, %err, "anti-delete failed");
            }
        }
    }

    async fn on_groups_update(&self, session: &dyn Session, groups: &[GroupUpdate]) {
        for update in groups {
            match self.group_metadata(session, &update.id).await {
                Ok(mut metadata) => {
                    metadata.apply_update(update);
                    self.ctx.caches().set_group(metadata);
                }
                Err(err) => {
                    let err = CoreError::handler("groups.update", err);
                    warn!(group = %update.id, %err, "group left uncached this cycle");
                }
            }
        }
    }

    async fn on_participants_update(&self, session: &dyn Session, update: &ParticipantsUpdate) {
        let now = Utc::now();
        let annotated = update
            .participants
            .iter()
            .filter(|jid| {
                self.ctx
                    .caches()
                    .annotate_user_group_action(jid, update.action, now)
            })
            .count();
        debug!(
            group = %update.id,
            action = update.action.as_str(),
            annotated,
            "participants changed"
        );

        match self.group_metadata(session, &update.id).await {
            Ok(mut metadata) => {
                metadata.apply_participants(update.action, &update.participants);
                self.ctx.caches().set_group(metadata);
            }
            Err(err) => {
                let err = CoreError::handler("group-participants.update", err);
                warn!(group = %update.id, %err, "group left uncached this cycle");
            }
        }
    }

    async fn on_creds_update(&self, auth: &AuthMaterial) -> Result<(), CoreError> {
        self.ctx
            .credentials()
            .save(auth)
            .await
            .map_err(CoreError::CredentialPersist)?;
        debug!("renewed credentials persisted");
        Ok(())
    }

    /// Cached metadata, or a fresh fetch when the group is not cached.
    async fn group_metadata(&self, session: &dyn Session, id: &Jid) -> Result<GroupMetadata> {
        if let Some(metadata) = self.ctx.caches().get_group(id) {
            return Ok(metadata);
        }
        session
            .fetch_group_metadata(id)
            .await
            .with_context(|| format!("failed to fetch metadata for {id}"))
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
