//! In-memory TTL cache for normalized result sets.
//!
//! Entries expire lazily: an expired entry is no longer returned by
//! [`CacheStore::get`] but stays available to [`CacheStore::get_stale`] until
//! a sweep removes it or the cache is cleared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::{Query, QueryKind, ResultSet};

/// Defines the behavior of the cache for one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read from the cache if a non-expired entry is present;
    /// otherwise, fetch from the network and write the result to the cache. (Default)
    #[default]
    Use,
    /// Always fetch from the network, bypassing any cached entry,
    /// and write the new result to the cache.
    Refresh,
    /// Always fetch from the network and do not read from or write to the cache.
    /// Stale entries are still served when every provider fails.
    Bypass,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result_set: ResultSet,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) <= self.ttl
    }
}

type Slot = Arc<RwLock<CacheEntry>>;

#[derive(Debug)]
struct CacheInner {
    slots: RwLock<HashMap<String, Slot>>,
    default_ttl: Duration,
    ttl_by_kind: HashMap<QueryKind, Duration>,
    sweep_multiple: u32,
}

/// Thread-safe cache keyed by [`Query::fingerprint`].
///
/// The key map lock is only held to find or insert a slot; each slot has its
/// own lock, so writers to different keys never contend.
#[derive(Debug, Clone)]
pub struct CacheStore {
    inner: Arc<CacheInner>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}

impl CacheStore {
    /// Create a new cache store with a default TTL.
    pub fn new(default_ttl: Duration) -> Self {
        Self::with_policy(default_ttl, HashMap::new(), 10)
    }

    /// Create a cache store with a default TTL of 5 minutes.
    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(300))
    }

    /// Full policy: default TTL, per-kind overrides and the age multiple
    /// (of an entry's TTL) after which sweeps drop it.
    pub fn with_policy(
        default_ttl: Duration,
        ttl_by_kind: HashMap<QueryKind, Duration>,
        sweep_multiple: u32,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                slots: RwLock::new(HashMap::new()),
                default_ttl,
                ttl_by_kind,
                sweep_multiple: sweep_multiple.max(1),
            }),
        }
    }

    pub fn ttl_for(&self, kind: QueryKind) -> Duration {
        self.inner
            .ttl_by_kind
            .get(&kind)
            .copied()
            .unwrap_or(self.inner.default_ttl)
    }

    async fn slot(&self, key: &str) -> Option<Slot> {
        self.inner.slots.read().await.get(key).cloned()
    }

    /// Fresh entry for `query`, if any. Returns an owned copy.
    pub async fn get(&self, query: &Query) -> Option<ResultSet> {
        let slot = self.slot(&query.fingerprint()).await?;
        let entry = slot.read().await;
        let fresh = entry.is_fresh(Instant::now());
        fresh.then(|| entry.result_set.clone())
    }

    /// Entry for `query` regardless of age. Used for degraded serving.
    pub async fn get_stale(&self, query: &Query) -> Option<ResultSet> {
        let slot = self.slot(&query.fingerprint()).await?;
        let result_set = slot.read().await.result_set.clone();
        Some(result_set)
    }

    /// Stores `result_set` for `query`, replacing any previous entry.
    ///
    /// Without `ttl_override` the TTL configured for the query kind applies.
    pub async fn put(
        &self,
        query: &Query,
        result_set: ResultSet,
        ttl_override: Option<Duration>,
    ) {
        let entry = CacheEntry {
            result_set,
            stored_at: Instant::now(),
            ttl: ttl_override.unwrap_or_else(|| self.ttl_for(query.kind())),
        };
        let key = query.fingerprint();

        if let Some(slot) = self.slot(&key).await {
            *slot.write().await = entry;
            return;
        }

        let mut slots = self.inner.slots.write().await;
        match slots.get(&key) {
            Some(slot) => *slot.write().await = entry,
            None => {
                slots.insert(key, Arc::new(RwLock::new(entry)));
            }
        }
    }

    /// Removes entries older than `sweep_multiple` times their TTL.
    /// Returns the number of removed entries.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let multiple = self.inner.sweep_multiple;
        let mut slots = self.inner.slots.write().await;
        let before = slots.len();

        let mut keep = HashMap::with_capacity(before);
        for (key, slot) in slots.drain() {
            let evict = {
                let entry = slot.read().await;
                now.saturating_duration_since(entry.stored_at) > entry.ttl * multiple
            };
            if !evict {
                keep.insert(key, slot);
            }
        }
        *slots = keep;

        let removed = before - slots.len();
        if removed > 0 {
            debug!(removed, remaining = slots.len(), "cache sweep");
        }
        removed
    }

    /// Runs [`sweep`](CacheStore::sweep) every `interval` on the Tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }

    /// Clear all entries from the cache.
    pub async fn clear(&self) {
        self.inner.slots.write().await.clear();
    }

    /// Get the number of entries in the cache (including expired entries).
    pub async fn len(&self) -> usize {
        self.inner.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
