use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::domain::{Jid, ParticipantAction};

/// Marker stored in the messages domain; its presence alone means "already processed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub jid: Jid,
    pub name: Option<String>,
    pub is_bot: bool,
    pub message_count: u64,
    pub last_seen: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_group_activity: Option<DateTime<Utc>>,
    pub group_action: Option<ParticipantAction>,
}

impl UserRecord {
    pub fn new(jid: Jid) -> Self {
        Self {
            jid,
            name: None,
            is_bot: false,
            message_count: 0,
            last_seen: None,
            connected_at: None,
            last_group_activity: None,
            group_action: None,
        }
    }

    /// Folds one more inbound message from this user into the record.
    pub fn record_message(&mut self, name: &str, at: DateTime<Utc>) {
        self.name = Some(name.to_string());
        self.last_seen = Some(at);
        self.message_count += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub mime_type: Option<String>,
    pub data: Arc<[u8]>,
}

impl MediaBlob {
    pub fn new(mime_type: Option<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type,
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
