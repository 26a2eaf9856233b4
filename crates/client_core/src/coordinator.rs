use chrono::{DateTime, Utc};
use shared::{
    domain::{Jid, MediaKey, MessageId, ParticipantAction},
    protocol::GroupMetadata,
};
use tracing::debug;

use crate::{
    cache::{CacheDomain, DomainStats, EntryCache},
    config::CacheConfig,
    types::{DedupRecord, MediaBlob, UserRecord},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Domain(CacheDomain),
    All,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub messages: DomainStats,
    pub users: DomainStats,
    pub groups: DomainStats,
    pub media: DomainStats,
}

impl CacheStats {
    pub fn domain(&self, domain: CacheDomain) -> DomainStats {
        match domain {
            CacheDomain::Messages => self.messages,
            CacheDomain::Users => self.users,
            CacheDomain::Groups => self.groups,
            CacheDomain::Media => self.media,
        }
    }

    fn all(&self) -> [DomainStats; 4] {
        [self.messages, self.users, self.groups, self.media]
    }

    pub fn total_keys(&self) -> usize {
        self.all().iter().map(|d| d.keys).sum()
    }

    pub fn total_hits(&self) -> u64 {
        self.all().iter().map(|d| d.hits).sum()
    }

    pub fn total_misses(&self) -> u64 {
        self.all().iter().map(|d| d.misses).sum()
    }

    /// hits / (hits + misses) across every domain; 0 when nothing was looked up yet.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.total_hits();
        let accesses = hits + self.total_misses();
        if accesses == 0 {
            return 0.0;
        }
        hits as f64 / accesses as f64
    }
}

/// Owns every entry cache and exposes typed accessors per domain.
pub struct CacheCoordinator {
    messages: EntryCache<MessageId, DedupRecord>,
    users: EntryCache<Jid, UserRecord>,
    groups: EntryCache<Jid, GroupMetadata>,
    media: EntryCache<MediaKey, MediaBlob>,
}

impl CacheCoordinator {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            messages: EntryCache::new(CacheDomain::Messages, config.messages),
            users: EntryCache::new(CacheDomain::Users, config.users),
            groups: EntryCache::new(CacheDomain::Groups, config.groups),
            media: EntryCache::new(CacheDomain::Media, config.media),
        }
    }

    // --- messages ---

    /// Atomically records `message_id` as seen. Returns true only for the first caller.
    pub fn mark_message_seen(&self, message_id: &MessageId) -> bool {
        self.messages
            .insert_if_absent(message_id.clone(), DedupRecord)
    }

    pub fn has_message(&self, message_id: &MessageId) -> bool {
        self.messages.has(message_id)
    }

    // --- users ---

    pub fn get_user(&self, jid: &Jid) -> Option<UserRecord> {
        self.users.get(jid)
    }

    pub fn set_user(&self, record: UserRecord) {
        self.users.set(record.jid.clone(), record);
    }

    pub fn has_user(&self, jid: &Jid) -> bool {
        self.users.has(jid)
    }

    /// Counts one inbound message for `jid`, creating the record when needed.
    pub fn record_user_message(&self, jid: &Jid, name: &str, at: DateTime<Utc>) -> UserRecord {
        self.users.upsert(jid.clone(), |existing| {
            let mut record = existing
                .cloned()
                .unwrap_or_else(|| UserRecord::new(jid.clone()));
            record.record_message(name, at);
            record
        })
    }

    /// Annotates an already cached user with a group membership change.
    /// Users that are not cached are skipped, never created.
    pub fn annotate_user_group_action(
        &self,
        jid: &Jid,
        action: ParticipantAction,
        at: DateTime<Utc>,
    ) -> bool {
        self.users.update_existing(jid, |record| {
            record.last_group_activity = Some(at);
            record.group_action = Some(action);
        })
    }

    // --- groups ---

    pub fn get_group(&self, id: &Jid) -> Option<GroupMetadata> {
        self.groups.get(id)
    }

    pub fn set_group(&self, metadata: GroupMetadata) {
        self.groups.set(metadata.id.clone(), metadata);
    }

    pub fn has_group(&self, id: &Jid) -> bool {
        self.groups.has(id)
    }

    // --- media ---

    pub fn media_get(&self, key: &MediaKey) -> Option<MediaBlob> {
        self.media.get(key)
    }

    pub fn media_set(&self, key: MediaKey, blob: MediaBlob) {
        self.media.set(key, blob);
    }

    pub fn media_has(&self, key: &MediaKey) -> bool {
        self.media.has(key)
    }

    // --- bulk ---

    /// Idempotent; safe alongside in-flight reads and writes. Returns removed entries.
    pub fn clear(&self, scope: ClearScope) -> usize {
        let removed = match scope {
            ClearScope::Domain(domain) => self.clear_domain(domain),
            ClearScope::All => CacheDomain::ALL
                .into_iter()
                .map(|domain| self.clear_domain(domain))
                .sum(),
        };
        debug!(?scope, removed, "cache cleared");
        removed
    }

    fn clear_domain(&self, domain: CacheDomain) -> usize {
        match domain {
            CacheDomain::Messages => self.messages.clear(),
            CacheDomain::Users => self.users.clear(),
            CacheDomain::Groups => self.groups.clear(),
            CacheDomain::Media => self.media.clear(),
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.messages.purge_expired()
            + self.users.purge_expired()
            + self.groups.purge_expired()
            + self.media.purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            messages: self.messages.stats(),
            users: self.users.stats(),
            groups: self.groups.stats(),
            media: self.media.stats(),
        }
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
