//! Connection resilience and cache coordination for a messaging bot.
//!
//! [`ConnectionSupervisor`] keeps one session alive and feeds its events through
//! the [`EventRouter`] into the [`CacheCoordinator`]; the [`MaintenanceScheduler`]
//! reconciles caches and guards memory in the background. Everything shares one
//! [`BotContext`].

pub mod anti_delete;
pub mod cache;
pub mod config;
pub mod connection;
pub mod context;
pub mod coordinator;
pub mod credentials;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod maintenance;
pub mod message;
pub mod router;
pub mod transport;
pub mod types;

pub use anti_delete::{RepostDeleted, RepostTarget};
pub use cache::{CacheDomain, DomainStats, EntryCache};
pub use config::{
    Backoff, CacheConfig, CoreConfig, DomainConfig, MaintenanceConfig, NotifyConfig,
    ReconnectConfig, RouterConfig,
};
pub use connection::{ConnectionState, ConnectionStateMachine, ConnectionSupervisor, Disposition};
pub use context::{BotContext, BotEvent, ClearCause, Collaborators};
pub use coordinator::{CacheCoordinator, CacheStats, ClearScope};
pub use credentials::{CredentialStore, FileCredentialStore};
pub use dedup::DedupFilter;
pub use error::{ConnectError, CoreError};
pub use gateway::{GatewayConnector, GatewaySession};
pub use handler::{AntiDelete, DisabledAntiDelete, LoggingMessageHandler, MessageHandler};
pub use maintenance::{MaintenanceScheduler, MaintenanceTasks, MemoryProbe, SysinfoProbe};
pub use message::InboundMessage;
pub use router::EventRouter;
pub use transport::{Session, SessionConnector, SessionHandle};
pub use types::{DedupRecord, MediaBlob, UserRecord};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
