use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{Jid, MessageId},
    protocol::{MessageContent, WireMessage},
};

const UNKNOWN_PUSH_NAME: &str = "Unknown";

/// A deduplicated inbound message in the shape handed to the message handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: MessageId,
    pub chat: Jid,
    pub sender: Jid,
    pub push_name: String,
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    pub content: MessageContent,
}

impl InboundMessage {
    /// `None` for protocol-only messages that carry no content.
    pub fn from_wire(message: &WireMessage) -> Option<Self> {
        let content = message.content.clone()?;
        let timestamp = message
            .timestamp
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);
        let push_name = message
            .push_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_PUSH_NAME)
            .to_string();

        Some(Self {
            id: message.key.id.clone(),
            chat: message.key.remote_jid.clone(),
            sender: message.key.sender().clone(),
            push_name,
            from_me: message.key.from_me,
            timestamp,
            content,
        })
    }

    pub fn kind(&self) -> &'static str {
        self.content.kind()
    }

    pub fn text(&self) -> Option<&str> {
        self.content.text()
    }

    pub fn is_group(&self) -> bool {
        self.chat.is_group()
    }
}

#[cfg(test)]
#[path = "tests/message_tests.rs"]
mod tests;
