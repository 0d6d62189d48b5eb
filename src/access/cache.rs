use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, Dispatch};

use super::store::{EntryStore, RepoAccessEntry};
use super::{cache_key, AccessError, RepoAccess, DEFAULT_TTL};
use crate::forge::AccessQuery;
use crate::metrics::AccessMetrics;

// ---------------------------------------------------------------------------
// Construction options
// ---------------------------------------------------------------------------

/// Configures a [`RepoAccessCache`] at construction time.
#[derive(Debug, Clone)]
pub enum RepoAccessOption {
    Ttl(Duration),
    Logger(Dispatch),
    Metrics(AccessMetrics),
}

/// Override the default idle TTL of 5 minutes.  A zero duration disables
/// expiration.
pub fn with_ttl(ttl: Duration) -> RepoAccessOption {
    RepoAccessOption::Ttl(ttl)
}

/// Send cache diagnostics (hits, misses, reconfiguration) to `logger`.
/// Without a logger diagnostics are dropped.
pub fn with_logger(logger: Dispatch) -> RepoAccessOption {
    RepoAccessOption::Logger(logger)
}

/// Record hit/miss/eviction counts into shared `metrics` instead of a
/// private set.
pub fn with_metrics(metrics: AccessMetrics) -> RepoAccessOption {
    RepoAccessOption::Metrics(metrics)
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of cache activity.
///
/// Counters come from the cache's [`AccessMetrics`]; when several caches
/// share one set via [`with_metrics`] the counts are shared too.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Caches repository privacy and per-user push access so lockdown checks can
/// reuse them across tasks.
///
/// Lookups for a known user never leave the process.  Misses go upstream
/// with at most one query in flight per repository; lookups for other
/// repositories proceed meanwhile.
pub struct RepoAccessCache {
    query: Option<Arc<dyn AccessQuery>>,
    store: Mutex<EntryStore>,
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    logger: RwLock<Option<Dispatch>>,
    metrics: AccessMetrics,
}

impl RepoAccessCache {
    /// Build a cache that resolves misses through `query`.
    ///
    /// A cache built without a query still serves lookups but every miss
    /// fails with [`AccessError::MissingQuery`].
    pub fn new(
        query: Option<Arc<dyn AccessQuery>>,
        options: impl IntoIterator<Item = RepoAccessOption>,
    ) -> Self {
        let mut ttl = DEFAULT_TTL;
        let mut logger = None;
        let mut metrics = AccessMetrics::default();
        for option in options {
            match option {
                RepoAccessOption::Ttl(t) => ttl = t,
                RepoAccessOption::Logger(l) => logger = Some(l),
                RepoAccessOption::Metrics(m) => metrics = m,
            }
        }

        let store = EntryStore::new(
            ttl,
            metrics.cache_evictions.clone(),
            metrics.cache_entries.clone(),
        );
        let cache = Self {
            query,
            store: Mutex::new(store),
            inflight: DashMap::new(),
            logger: RwLock::new(logger),
            metrics,
        };
        cache.emit(|| {
            info!(
                ttl = %humantime::format_duration(ttl),
                has_query = cache.query.is_some(),
                "repo access cache initialized"
            )
        });
        cache
    }

    /// Return whether `owner/repo` is private and whether `username` can
    /// push to it.
    ///
    /// Owner, repo and username are compared case-insensitively.  A failed
    /// upstream query is returned as-is and leaves the cache untouched.
    pub async fn get_repo_access_info(
        &self,
        username: &str,
        owner: &str,
        repo: &str,
    ) -> Result<RepoAccess, AccessError> {
        let key = cache_key(owner, repo);
        let user_key = username.to_lowercase();

        if let Some(access) = self.cached(&key, &user_key) {
            self.record_hit(username, owner, repo);
            return Ok(access);
        }

        // Serialize misses per key.  The lease drops the lock slot once no
        // task holds or waits on it.
        let _lease = KeyLease {
            inflight: &self.inflight,
            key: &key,
        };
        let lock = Arc::clone(self.inflight.entry(key.clone()).or_default().value());
        let _guard = lock.lock_owned().await;

        // A task that held the key lock before us may have answered already.
        if let Some(access) = self.cached(&key, &user_key) {
            self.record_hit(username, owner, repo);
            return Ok(access);
        }

        self.metrics.cache_misses.inc();
        self.emit(|| debug!(owner, repo, user = username, "repo access cache miss"));

        let query = self.query.as_ref().ok_or(AccessError::MissingQuery)?;
        let response = query
            .query_repo_access(owner, repo, username)
            .await
            .map_err(AccessError::Query)?;

        let has_push = response.has_push(username);
        Ok(self.merge(&key, user_key, response.is_private, has_push))
    }

    /// Change the idle TTL.  Cached data is kept; every live entry restarts
    /// its clock under the new TTL.
    pub fn set_ttl(&self, ttl: Duration) {
        let evicted = self.store.lock().retime(ttl, Instant::now());
        self.emit(|| {
            info!(
                ttl = %humantime::format_duration(ttl),
                evicted,
                "repo access cache TTL updated"
            )
        });
    }

    /// Replace the diagnostics sink.  `None` silences the cache.
    pub fn set_logger(&self, logger: Option<Dispatch>) {
        *self.logger.write() = logger;
    }

    pub fn ttl(&self) -> Duration {
        self.store.lock().ttl()
    }

    /// Number of repositories currently cached, expired or not.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached entry.
    pub fn flush(&self) {
        self.store.lock().clear();
        self.emit(|| info!("repo access cache flushed"));
    }

    /// Evict entries idle for at least the TTL.  Returns how many went.
    pub fn purge_expired(&self) -> usize {
        self.store.lock().purge_expired(Instant::now())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.metrics.cache_hits.get(),
            misses: self.metrics.cache_misses.get(),
            evictions: self.metrics.cache_evictions.get(),
            entries: self.len(),
        }
    }

    pub fn metrics(&self) -> &AccessMetrics {
        &self.metrics
    }

    /// Periodically evict expired entries in the background.
    ///
    /// The task only holds a weak reference and stops once the cache is
    /// dropped.  Returns `None` when `period` is zero.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> Option<JoinHandle<()>> {
        if period.is_zero() {
            return None;
        }
        let cache: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let evicted = cache.purge_expired();
                if evicted > 0 {
                    cache.emit(|| debug!(evicted, "expired repo access entries swept"));
                }
            }
        }))
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn cached(&self, key: &str, user_key: &str) -> Option<RepoAccess> {
        let mut store = self.store.lock();
        let entry = store.value(key, Instant::now())?;
        let has_push = *entry.known_users.get(user_key)?;
        Some(RepoAccess {
            is_private: entry.is_private,
            has_push,
        })
    }

    /// Fold a fresh query result into the store.
    ///
    /// An existing entry keeps its privacy flag and gains the user; otherwise
    /// a new entry is created from the query result.
    fn merge(&self, key: &str, user_key: String, is_private: bool, has_push: bool) -> RepoAccess {
        let mut store = self.store.lock();
        let now = Instant::now();
        if let Some(entry) = store.value(key, now) {
            entry.known_users.insert(user_key, has_push);
            return RepoAccess {
                is_private: entry.is_private,
                has_push,
            };
        }

        store.insert(
            key.to_string(),
            RepoAccessEntry::new(is_private, user_key, has_push),
            now,
        );
        RepoAccess {
            is_private,
            has_push,
        }
    }

    fn record_hit(&self, username: &str, owner: &str, repo: &str) {
        self.metrics.cache_hits.inc();
        self.emit(|| debug!(owner, repo, user = username, "repo access cache hit"));
    }

    fn emit(&self, event: impl FnOnce()) {
        if let Some(logger) = self.logger.read().as_ref() {
            tracing::dispatcher::with_default(logger, event);
        }
    }
}

impl std::fmt::Debug for RepoAccessCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoAccessCache")
            .field("has_query", &self.query.is_some())
            .field("ttl", &self.ttl())
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

/// Removes a per-key lock slot from the in-flight map once nobody else
/// references it.
struct KeyLease<'a> {
    inflight: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    key: &'a str,
}

impl Drop for KeyLease<'_> {
    fn drop(&mut self) {
        self.inflight
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
