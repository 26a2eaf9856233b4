//! Fixed-capacity, TTL-bounded key/value stores, one per cache domain.
//!
//! Expiry is logical: an entry older than its domain TTL is never returned, whether
//! or not it has been physically removed yet. Physical removal happens lazily on
//! access, on capacity pressure, and through [`EntryCache::purge_expired`].

use std::{
    fmt,
    hash::Hash,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use dashmap::{mapref::entry::Entry as MapEntry, DashMap};
use tokio::time::Instant;

use crate::config::DomainConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheDomain {
    Messages,
    Users,
    Groups,
    Media,
}

impl CacheDomain {
    pub const ALL: [CacheDomain; 4] = [Self::Messages, Self::Users, Self::Groups, Self::Media];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Users => "users",
            Self::Groups => "groups",
            Self::Media => "media",
        }
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DomainStats {
    pub keys: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Slot<V> {
    value: V,
    inserted_at: Instant,
}

impl<V> Slot<V> {
    fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
        }
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > ttl
    }
}

pub struct EntryCache<K, V> {
    domain: CacheDomain,
    entries: DashMap<K, Slot<V>>,
    ttl: Duration,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> EntryCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(domain: CacheDomain, config: DomainConfig) -> Self {
        Self {
            domain,
            entries: DashMap::new(),
            ttl: config.ttl,
            capacity: config.capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn domain(&self) -> CacheDomain {
        self.domain
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut expired = false;
        let found = match self.entries.get(key) {
            Some(slot) if !slot.is_expired(self.ttl, now) => Some(slot.value.clone()),
            Some(_) => {
                expired = true;
                None
            }
            None => None,
        };
        if expired {
            self.entries
                .remove_if(key, |_, slot| slot.is_expired(self.ttl, now));
        }
        self.record_access(found.is_some());
        found
    }

    /// Presence check that does not count towards hit/miss statistics.
    pub fn has(&self, key: &K) -> bool {
        let now = Instant::now();
        self.entries
            .get(key)
            .is_some_and(|slot| !slot.is_expired(self.ttl, now))
    }

    pub fn set(&self, key: K, value: V) {
        let now = Instant::now();
        self.reserve_for(&key, now);
        self.entries.insert(key, Slot::new(value, now));
    }

    /// Inserts only when no live entry exists. Returns true if this call inserted.
    ///
    /// The check and the insert happen under one shard lock, so concurrent callers
    /// racing on the same key observe exactly one `true`. A full cache only sheds
    /// expired entries here; live markers are never evicted, so the domain may grow
    /// past capacity until the memory guard clears it.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        let now = Instant::now();
        self.drop_expired_when_full(&key, now);
        let inserted = match self.entries.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                if occupied.get().is_expired(self.ttl, now) {
                    occupied.insert(Slot::new(value, now));
                    true
                } else {
                    false
                }
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Slot::new(value, now));
                true
            }
        };
        self.record_access(!inserted);
        inserted
    }

    /// Read-modify-write of one key under its shard lock. `merge` receives the live
    /// value if any; the result is stored with a fresh TTL.
    pub fn upsert<F>(&self, key: K, merge: F) -> V
    where
        F: FnOnce(Option<&V>) -> V,
    {
        let now = Instant::now();
        self.reserve_for(&key, now);
        let (value, hit) = match self.entries.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                let live = !occupied.get().is_expired(self.ttl, now);
                let value = merge(live.then(|| &occupied.get().value));
                occupied.insert(Slot::new(value.clone(), now));
                (value, live)
            }
            MapEntry::Vacant(vacant) => {
                let value = merge(None);
                vacant.insert(Slot::new(value.clone(), now));
                (value, false)
            }
        };
        self.record_access(hit);
        value
    }

    /// Mutates a live entry in place and refreshes its TTL. Absent or expired keys
    /// are left alone and yield false.
    pub fn update_existing<F>(&self, key: &K, update: F) -> bool
    where
        F: FnOnce(&mut V),
    {
        let now = Instant::now();
        let updated = match self.entries.get_mut(key) {
            Some(mut slot) if !slot.is_expired(self.ttl, now) => {
                update(&mut slot.value);
                slot.inserted_at = now;
                true
            }
            _ => false,
        };
        self.record_access(updated);
        updated
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .remove(key)
            .filter(|(_, slot)| !slot.is_expired(self.ttl, now))
            .map(|(_, slot)| slot.value)
    }

    /// Drops every entry. Returns the number of physically removed entries.
    pub fn clear(&self) -> usize {
        let before = self.entries.len();
        self.entries.clear();
        before
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, slot| !slot.is_expired(self.ttl, now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries that are still logically live.
    pub fn live_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|slot| !slot.is_expired(self.ttl, now))
            .count()
    }

    pub fn stats(&self) -> DomainStats {
        DomainStats {
            keys: self.live_len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn record_access(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Makes room for a new key: first drops expired entries, then the oldest one.
    fn reserve_for(&self, key: &K, now: Instant) {
        if self.drop_expired_when_full(key, now) {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|slot| slot.inserted_at)
            .map(|slot| slot.key().clone());
        if let Some(oldest) = oldest {
            self.entries.remove(&oldest);
        }
    }

    /// Drops expired entries when a new key would exceed capacity. Returns true
    /// when there is room for `key` afterwards.
    fn drop_expired_when_full(&self, key: &K, now: Instant) -> bool {
        if self.entries.len() < self.capacity || self.entries.contains_key(key) {
            return true;
        }
        self.entries
            .retain(|_, slot| !slot.is_expired(self.ttl, now));
        self.entries.len() < self.capacity
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
