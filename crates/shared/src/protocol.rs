use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::domain::{Jid, MessageId, ParticipantAction, ParticipantRole};

/// Stub type the network attaches to a message that was revoked by its sender.
pub const REVOKE_STUB_TYPE: u32 = 2;

/// Credential material for one linked device. Secrets are wiped from memory on drop.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthMaterial {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<Jid>,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

impl AuthMaterial {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            device_id: None,
            me: None,
            keys: BTreeMap::new(),
        }
    }

    pub fn is_registered(&self) -> bool {
        !self.token.is_empty()
    }
}

impl fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMaterial")
            .field("token", &"<redacted>")
            .field("device_id", &self.device_id)
            .field("me", &self.me)
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl Drop for AuthMaterial {
    fn drop(&mut self) {
        self.token.zeroize();
        for value in self.keys.values_mut() {
            value.zeroize();
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub jid: Jid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Why a session ended, mirroring the close codes the network reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    BadSession,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    LoggedOut,
    MultideviceMismatch,
    RestartRequired,
    Forbidden,
    UnavailableService,
    /// The event stream ended without a close notification.
    StreamEnded,
    /// Renewed credentials could not be persisted; the session is unusable.
    CredentialPersistFailed,
    Unknown(u16),
}

impl DisconnectReason {
    pub fn from_status_code(code: u16) -> Self {
        match code {
            500 => Self::BadSession,
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            411 => Self::MultideviceMismatch,
            515 => Self::RestartRequired,
            403 => Self::Forbidden,
            503 => Self::UnavailableService,
            other => Self::Unknown(other),
        }
    }

    pub fn status_code(self) -> Option<u16> {
        match self {
            Self::BadSession => Some(500),
            Self::ConnectionClosed => Some(428),
            Self::ConnectionLost => Some(408),
            Self::ConnectionReplaced => Some(440),
            Self::LoggedOut => Some(401),
            Self::MultideviceMismatch => Some(411),
            Self::RestartRequired => Some(515),
            Self::Forbidden => Some(403),
            Self::UnavailableService => Some(503),
            Self::Unknown(code) => Some(code),
            Self::StreamEnded | Self::CredentialPersistFailed => None,
        }
    }

    /// Credentials were invalidated; local session state must be discarded.
    pub fn requires_wipe(self) -> bool {
        matches!(self, Self::BadSession | Self::LoggedOut)
    }

    pub fn label(self) -> String {
        match self {
            Self::BadSession => "Bad Session".to_string(),
            Self::ConnectionClosed => "Connection Closed".to_string(),
            Self::ConnectionLost => "Connection Lost".to_string(),
            Self::ConnectionReplaced => "Connection Replaced".to_string(),
            Self::LoggedOut => "Logged Out".to_string(),
            Self::MultideviceMismatch => "Multidevice Mismatch".to_string(),
            Self::RestartRequired => "Restart Required".to_string(),
            Self::Forbidden => "Forbidden".to_string(),
            Self::UnavailableService => "Unavailable Service".to_string(),
            Self::StreamEnded => "Stream Ended".to_string(),
            Self::CredentialPersistFailed => "Credential Persist Failed".to_string(),
            Self::Unknown(code) => format!("Unknown ({code})"),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionUpdate {
    Connecting,
    Open {
        me: BotIdentity,
    },
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
    Qr {
        code: String,
    },
}

impl ConnectionUpdate {
    pub fn close(reason: DisconnectReason) -> Self {
        Self::Close {
            status_code: reason.status_code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertKind {
    /// Live delivery of new messages.
    Notify,
    /// History sync or self-echo batches.
    Append,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKey {
    pub id: MessageId,
    pub remote_jid: Jid,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
}

impl MessageKey {
    /// Group messages carry the author in `participant`; direct chats use the chat itself.
    pub fn sender(&self) -> &Jid {
        self.participant.as_ref().unwrap_or(&self.remote_jid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    Image {
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Video {
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Audio {
        #[serde(default)]
        url: Option<String>,
    },
    Document {
        #[serde(default)]
        file_name: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Sticker {
        #[serde(default)]
        url: Option<String>,
    },
    Reaction {
        emoji: String,
        target: MessageId,
    },
}

impl MessageContent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Video { .. } => "video",
            Self::Audio { .. } => "audio",
            Self::Document { .. } => "document",
            Self::Sticker { .. } => "sticker",
            Self::Reaction { .. } => "reaction",
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Image { caption, .. } | Self::Video { caption, .. } => caption.as_deref(),
            Self::Document { file_name, .. } => file_name.as_deref(),
            Self::Reaction { emoji, .. } => Some(emoji),
            Self::Audio { .. } | Self::Sticker { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    /// Unix seconds as reported by the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayload {
    /// The message body was cleared by the network.
    #[serde(default)]
    pub message_removed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stub_type: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub key: MessageKey,
    pub update: UpdatePayload,
}

impl MessageUpdate {
    pub fn is_removal(&self) -> bool {
        self.update.message_removed || self.update.stub_type == Some(REVOKE_STUB_TYPE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub jid: Jid,
    #[serde(default)]
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: Jid,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Jid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub participants: Vec<GroupParticipant>,
    #[serde(default)]
    pub announce: bool,
    #[serde(default)]
    pub restrict: bool,
}

impl GroupMetadata {
    pub fn apply_update(&mut self, update: &GroupUpdate) {
        if let Some(subject) = &update.subject {
            self.subject = subject.clone();
        }
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
        if let Some(announce) = update.announce {
            self.announce = announce;
        }
        if let Some(restrict) = update.restrict {
            self.restrict = restrict;
        }
    }

    pub fn apply_participants(&mut self, action: ParticipantAction, jids: &[Jid]) {
        match action {
            ParticipantAction::Add => {
                for jid in jids {
                    if !self.participants.iter().any(|p| &p.jid == jid) {
                        self.participants.push(GroupParticipant {
                            jid: jid.clone(),
                            role: ParticipantRole::Member,
                        });
                    }
                }
            }
            ParticipantAction::Remove => {
                self.participants.retain(|p| !jids.contains(&p.jid));
            }
            ParticipantAction::Promote | ParticipantAction::Demote => {
                let role = if action == ParticipantAction::Promote {
                    ParticipantRole::Admin
                } else {
                    ParticipantRole::Member
                };
                for participant in &mut self.participants {
                    if jids.contains(&participant.jid) {
                        participant.role = role;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub id: Jid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announce: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantsUpdate {
    pub id: Jid,
    pub participants: Vec<Jid>,
    pub action: ParticipantAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Jid>,
}

/// Every event category the session can emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectionUpdate(ConnectionUpdate),
    CredsUpdate(AuthMaterial),
    MessagesUpsert {
        kind: UpsertKind,
        messages: Vec<WireMessage>,
    },
    MessagesUpdate {
        updates: Vec<MessageUpdate>,
    },
    GroupsUpdate {
        groups: Vec<GroupUpdate>,
    },
    GroupParticipantsUpdate(ParticipantsUpdate),
}

impl SessionEvent {
    pub fn category(&self) -> &'static str {
        match self {
            Self::ConnectionUpdate(_) => "connection.update",
            Self::CredsUpdate(_) => "creds.update",
            Self::MessagesUpsert { .. } => "messages.upsert",
            Self::MessagesUpdate { .. } => "messages.update",
            Self::GroupsUpdate { .. } => "groups.update",
            Self::GroupParticipantsUpdate(_) => "group-participants.update",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Image {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub to: Jid,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: MessageId,
}
