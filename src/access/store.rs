//! Sliding-TTL entry store.
//!
//! Holds one [`RepoAccessEntry`] per cache key.  Every read that finds a live
//! entry restarts its idle clock; entries idle for at least the TTL are
//! dropped lazily on read or by [`EntryStore::purge_expired`].  A zero TTL
//! disables expiration.

use std::collections::HashMap;
use std::time::Duration;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use tokio::time::Instant;

/// Cached access information for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoAccessEntry {
    pub is_private: bool,
    /// Lowercased login -> has push access.
    pub known_users: HashMap<String, bool>,
}

impl RepoAccessEntry {
    pub fn new(is_private: bool, user_key: String, has_push: bool) -> Self {
        Self {
            is_private,
            known_users: HashMap::from([(user_key, has_push)]),
        }
    }
}

#[derive(Debug)]
struct Slot {
    entry: RepoAccessEntry,
    last_access: Instant,
}

#[derive(Debug)]
pub(crate) struct EntryStore {
    slots: HashMap<String, Slot>,
    ttl: Duration,
    evictions: Counter,
    entries: Gauge,
}

impl EntryStore {
    pub fn new(ttl: Duration, evictions: Counter, entries: Gauge) -> Self {
        Self {
            slots: HashMap::new(),
            ttl,
            evictions,
            entries,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Return the live entry for `key` and restart its idle clock.
    ///
    /// An entry found expired is evicted and `None` is returned.
    pub fn value(&mut self, key: &str, now: Instant) -> Option<&mut RepoAccessEntry> {
        let expired = is_expired(self.ttl, self.slots.get(key)?, now);
        if expired {
            self.slots.remove(key);
            self.evictions.inc();
            self.sync_gauge();
            return None;
        }

        let slot = self.slots.get_mut(key)?;
        slot.last_access = now;
        Some(&mut slot.entry)
    }

    /// Insert `entry` under `key`, replacing any previous entry.
    pub fn insert(&mut self, key: String, entry: RepoAccessEntry, now: Instant) {
        self.slots.insert(
            key,
            Slot {
                entry,
                last_access: now,
            },
        );
        self.sync_gauge();
    }

    /// Drop every expired entry.  Returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.slots.len();
        self.slots.retain(|_, slot| !is_expired(ttl, slot, now));
        let evicted = before - self.slots.len();
        if evicted > 0 {
            self.evictions.inc_by(evicted as u64);
            self.sync_gauge();
        }
        evicted
    }

    /// Switch to `ttl` without losing data.
    ///
    /// Live entries are collected, the store is cleared, and each entry is
    /// reinserted with a fresh clock under the new TTL.  Entries that had
    /// already expired under the old TTL are dropped rather than revived.
    /// Returns how many expired entries were dropped.
    pub fn retime(&mut self, ttl: Duration, now: Instant) -> usize {
        let evicted = self.purge_expired(now);
        let live: Vec<(String, RepoAccessEntry)> = self
            .slots
            .drain()
            .map(|(key, slot)| (key, slot.entry))
            .collect();

        self.ttl = ttl;
        for (key, entry) in live {
            self.slots.insert(
                key,
                Slot {
                    entry,
                    last_access: now,
                },
            );
        }
        self.sync_gauge();
        evicted
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.sync_gauge();
    }

    fn sync_gauge(&self) {
        self.entries
            .set(i64::try_from(self.slots.len()).unwrap_or(i64::MAX));
    }
}

fn is_expired(ttl: Duration, slot: &Slot, now: Instant) -> bool {
    !ttl.is_zero() && now.duration_since(slot.last_access) >= ttl
}
