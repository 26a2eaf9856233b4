use anyhow::{Context, Result};
use async_trait::async_trait;
use shared::{
    domain::Jid,
    protocol::{MessageContent, MessageUpdate, OutboundMessage},
};
use storage::{MessageHistory, StoredMessage};
use tracing::{debug, info};

use crate::{handler::AntiDelete, transport::Session};

/// Where recovered messages are re-posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepostTarget {
    /// Back into the chat the message was removed from.
    SameChat,
    Owner(Jid),
}

/// Re-posts messages that their sender removed, using the recorded history.
pub struct RepostDeleted {
    target: RepostTarget,
}

impl RepostDeleted {
    pub fn new(target: RepostTarget) -> Self {
        Self { target }
    }

    fn destination(&self, stored: &StoredMessage) -> Jid {
        match &self.target {
            RepostTarget::SameChat => stored.chat.clone(),
            RepostTarget::Owner(owner) => owner.clone(),
        }
    }
}

#[async_trait]
impl AntiDelete for RepostDeleted {
    async fn on_removal(
        &self,
        session: &dyn Session,
        update: &MessageUpdate,
        history: &dyn MessageHistory,
    ) -> Result<()> {
        let message_id = &update.key.id;
        let Some(stored) = history
            .load_message(message_id)
            .await
            .with_context(|| format!("failed to look up removed message {message_id}"))?
        else {
            debug!(%message_id, "removed message was never recorded");
            return Ok(());
        };

        if stored.from_me {
            return Ok(());
        }
        let Some(body) = recovered_body(&stored) else {
            debug!(%message_id, "removed message has nothing to repost");
            return Ok(());
        };

        let to = self.destination(&stored);
        session
            .send_message(&to, OutboundMessage::Text { text: body })
            .await
            .with_context(|| format!("failed to repost removed message {message_id}"))?;
        info!(%message_id, chat = %stored.chat, to = %to, "reposted removed message");
        Ok(())
    }
}

fn recovered_body(stored: &StoredMessage) -> Option<String> {
    let content = stored.content.as_ref()?;
    let sender = stored.push_name.as_deref().unwrap_or(stored.sender.user());
    let header = format!(
        "Deleted message from {sender} in {} (sent {})",
        stored.chat,
        stored.sent_at.format("%Y-%m-%d %H:%M:%S")
    );
    let detail = match content {
        MessageContent::Text { text } => text.clone(),
        MessageContent::Reaction { .. } => return None,
        other => match other.text() {
            Some(caption) => format!("[{}] {caption}", other.kind()),
            None => format!("[{}]", other.kind()),
        },
    };
    Some(format!("{header}\n\n{detail}"))
}

#[cfg(test)]
#[path = "tests/anti_delete_tests.rs"]
mod tests;
