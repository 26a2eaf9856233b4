use anyhow::Result;
use async_trait::async_trait;
use shared::protocol::MessageUpdate;
use storage::MessageHistory;
use tracing::debug;

use crate::{message::InboundMessage, transport::Session};

/// Downstream consumer of deduplicated inbound messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, session: &dyn Session, message: &InboundMessage) -> Result<()>;
}

/// Consumer of removal signals; gets the persistent history to look the message up.
#[async_trait]
pub trait AntiDelete: Send + Sync {
    async fn on_removal(
        &self,
        session: &dyn Session,
        update: &MessageUpdate,
        history: &dyn MessageHistory,
    ) -> Result<()>;
}

/// Used when no command dispatcher is installed.
pub struct LoggingMessageHandler;

#[async_trait]
impl MessageHandler for LoggingMessageHandler {
    async fn handle(&self, _session: &dyn Session, message: &InboundMessage) -> Result<()> {
        debug!(
            message_id = %message.id,
            text = message.text().unwrap_or_default(),
            "no handler installed"
        );
        Ok(())
    }
}

pub struct DisabledAntiDelete;

#[async_trait]
impl AntiDelete for DisabledAntiDelete {
    async fn on_removal(
        &self,
        _session: &dyn Session,
        update: &MessageUpdate,
        _history: &dyn MessageHistory,
    ) -> Result<()> {
        debug!(message_id = %update.key.id, "anti-delete disabled; ignoring removal");
        Ok(())
    }
}
