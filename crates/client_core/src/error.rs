use shared::error::GatewayException;
use thiserror::Error;

/// Failure to establish one session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("network failure while connecting: {0:#}")]
    Network(#[from] anyhow::Error),
    #[error("gateway rejected the connection: {0}")]
    Rejected(GatewayException),
    /// Credentials were refused or the device was logged out.
    #[error("session credentials are no longer valid")]
    InvalidSession,
    #[error("no stored credentials and interactive authentication is disabled")]
    MissingCredentials,
}

impl ConnectError {
    /// Invalid sessions take the wipe path instead of a plain retry.
    pub fn invalidates_session(&self) -> bool {
        matches!(self, Self::InvalidSession)
    }
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("{category} handler failed: {source:#}")]
    TransientHandler {
        category: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("maintenance task '{task}' failed: {source:#}")]
    MaintenanceTask {
        task: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to persist renewed credentials: {0:#}")]
    CredentialPersist(#[source] anyhow::Error),
}

impl CoreError {
    pub fn handler(category: &'static str, source: anyhow::Error) -> Self {
        Self::TransientHandler { category, source }
    }

    pub fn maintenance(task: &'static str, source: anyhow::Error) -> Self {
        Self::MaintenanceTask { task, source }
    }

    /// Only credential persistence failures end the current session.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::CredentialPersist(_))
    }
}
