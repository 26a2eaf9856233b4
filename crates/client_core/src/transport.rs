use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{Jid, MessageId},
    protocol::{AuthMaterial, GroupMetadata, OutboundMessage, SessionEvent},
};
use tokio::sync::mpsc;

use crate::error::ConnectError;

/// One live, authenticated connection to the messaging network.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send_message(&self, to: &Jid, message: OutboundMessage) -> Result<MessageId>;
    async fn fetch_group_metadata(&self, group: &Jid) -> Result<GroupMetadata>;
    async fn fetch_all_groups(&self) -> Result<Vec<GroupMetadata>>;
    /// Tears down the connection. Further calls on this handle may fail.
    async fn close(&self) -> Result<()>;
}

/// Everything a successful connect yields: the handle plus its ordered event stream.
/// The stream ends when the connection is gone.
pub struct SessionHandle {
    pub session: Arc<dyn Session>,
    pub events: mpsc::Receiver<SessionEvent>,
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, auth: Option<AuthMaterial>) -> Result<SessionHandle, ConnectError>;
}
