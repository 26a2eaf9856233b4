use std::sync::Arc;

use shared::domain::MessageId;
use tracing::debug;

use crate::coordinator::CacheCoordinator;

/// Rejects message ids that were already processed within the messages TTL.
#[derive(Clone)]
pub struct DedupFilter {
    caches: Arc<CacheCoordinator>,
}

impl DedupFilter {
    pub fn new(caches: Arc<CacheCoordinator>) -> Self {
        Self { caches }
    }

    /// Returns true when `message_id` was seen before. The first call for an id
    /// records it, so exactly one caller observes `false` per TTL window.
    pub fn is_duplicate(&self, message_id: &MessageId) -> bool {
        let duplicate = !self.caches.mark_message_seen(message_id);
        if duplicate {
            debug!(%message_id, "dropping redelivered message");
        }
        duplicate
    }
}

#[cfg(test)]
#[path = "tests/dedup_tests.rs"]
mod tests;
