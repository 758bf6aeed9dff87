//! Query-result cache with version-aware invalidation and LRU eviction.
//!
//! Consistency model: **synchronous (strong)**. Every index mutation calls
//! [`QueryCache::invalidate_below`] before the mutation is acknowledged, so
//! the documented staleness window is zero. The version check inside
//! [`QueryCache::get`] is a backstop, never the primary mechanism.
//!
//! Concurrency: the map sits behind one async mutex, so a reader observes
//! either the pre-write or the fully written entry, never a partial one.
//! [`KeyedLock`] serializes the compute-and-fill path per fingerprint so two
//! concurrent misses for the same query perform a single computation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::document::{Citation, MetadataFilter, RetrievalResult};

/// Deterministic cache key for an answer.
///
/// Derived from the normalized query text, the filter, `top_k`, and the
/// generation model id. The index version is deliberately *not* part of the
/// key: entries record the version they were computed at and are invalidated
/// against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Trimmed, lowercased query text (normalization is for keying only).
    pub query: String,
    /// The metadata filter, if any.
    pub filter: Option<MetadataFilter>,
    /// Requested result count.
    pub top_k: usize,
    /// Generation model identifier.
    pub model: String,
}

impl Fingerprint {
    /// Build a fingerprint, normalizing the query text.
    pub fn new(
        query: &str,
        filter: Option<&MetadataFilter>,
        top_k: usize,
        model: &str,
    ) -> Self {
        Self {
            query: query.trim().to_lowercase(),
            filter: filter.cloned(),
            top_k,
            model: model.to_string(),
        }
    }
}

/// A memoized answer bound to the index version it was computed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The retrieval output the answer was grounded on.
    pub retrieval: RetrievalResult,
    /// The generated answer text.
    pub answer: String,
    /// Citations for the packed context chunks.
    pub citations: Vec<Citation>,
    /// Whether the answer was grounded in retrieved evidence.
    pub grounded: bool,
    /// Index version observed when the answer was computed.
    pub index_version: u64,
    /// Entry creation time.
    pub created_at: DateTime<Utc>,
}

struct Slot {
    entry: CacheEntry,
    /// Monotonic access stamp for LRU ordering.
    last_used: u64,
}

struct CacheState {
    slots: HashMap<Fingerprint, Slot>,
    clock: u64,
}

/// LRU-bounded, version-aware answer cache.
pub struct QueryCache {
    capacity: usize,
    state: Mutex<CacheState>,
    locks: KeyedLock,
}

impl QueryCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(CacheState { slots: HashMap::new(), clock: 0 }),
            locks: KeyedLock::new(),
        }
    }

    /// Look up an entry, dropping it if it predates `current_version`.
    pub async fn get(&self, fingerprint: &Fingerprint, current_version: u64) -> Option<CacheEntry> {
        let mut state = self.state.lock().await;
        state.clock += 1;
        let clock = state.clock;

        if let Some(slot) = state.slots.get_mut(fingerprint) {
            if slot.entry.index_version == current_version {
                slot.last_used = clock;
                return Some(slot.entry.clone());
            }
        }
        // Backstop: synchronous invalidation should already have swept a
        // stale entry.
        if state.slots.remove(fingerprint).is_some() {
            debug!(query = %fingerprint.query, "dropped stale cache entry on read");
        }
        None
    }

    /// Store an entry, evicting the least-recently-used one at capacity.
    pub async fn put(&self, fingerprint: Fingerprint, entry: CacheEntry) {
        let mut state = self.state.lock().await;
        state.clock += 1;
        let clock = state.clock;

        if !state.slots.contains_key(&fingerprint) && state.slots.len() >= self.capacity {
            if let Some(victim) = state
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone())
            {
                state.slots.remove(&victim);
                debug!(query = %victim.query, "evicted least-recently-used cache entry");
            }
        }

        state.slots.insert(fingerprint, Slot { entry, last_used: clock });
    }

    /// Drop every entry recorded against a version older than `version`.
    ///
    /// Invoked synchronously after each index mutation.
    pub async fn invalidate_below(&self, version: u64) {
        let mut state = self.state.lock().await;
        let before = state.slots.len();
        state.slots.retain(|_, slot| slot.entry.index_version >= version);
        let dropped = before - state.slots.len();
        if dropped > 0 {
            debug!(version, dropped, "invalidated cache entries below index version");
        }
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.state.lock().await.slots.clear();
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.state.lock().await.slots.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.slots.is_empty()
    }

    /// Acquire the per-fingerprint computation lock.
    ///
    /// The engine holds this across its check-compute-fill sequence so
    /// concurrent misses for the same fingerprint collapse into one
    /// computation.
    pub async fn lock_fingerprint(&self, fingerprint: &Fingerprint) -> OwnedMutexGuard<()> {
        self.locks.acquire(fingerprint).await
    }
}

/// Per-key async mutual exclusion.
///
/// Lock objects are created on demand and garbage-collected once no task
/// holds or waits on them.
pub struct KeyedLock {
    locks: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
}

impl KeyedLock {
    fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    async fn acquire(&self, key: &Fingerprint) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Opportunistic GC of uncontended locks.
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(query: &str) -> Fingerprint {
        Fingerprint::new(query, None, 5, "model")
    }

    fn entry(version: u64) -> CacheEntry {
        CacheEntry {
            retrieval: RetrievalResult::empty(version),
            answer: format!("answer@{version}"),
            citations: Vec::new(),
            grounded: true,
            index_version: version,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fingerprint_normalizes_query_text_only() {
        assert_eq!(fp("  What is Sepsis? "), fp("what is sepsis?"));
        assert_ne!(fp("sepsis"), Fingerprint::new("sepsis", None, 5, "other-model"));
    }

    #[tokio::test]
    async fn get_honors_version_binding() {
        let cache = QueryCache::new(8);
        cache.put(fp("q"), entry(3)).await;

        assert!(cache.get(&fp("q"), 3).await.is_some());
        // Same fingerprint against a newer index version is a miss and the
        // stale entry is dropped.
        assert!(cache.get(&fp("q"), 4).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_below_sweeps_older_entries() {
        let cache = QueryCache::new(8);
        cache.put(fp("old"), entry(1)).await;
        cache.put(fp("new"), entry(2)).await;

        cache.invalidate_below(2).await;
        assert!(cache.get(&fp("old"), 1).await.is_none());
        assert!(cache.get(&fp("new"), 2).await.is_some());
    }

    #[tokio::test]
    async fn lru_eviction_drops_least_recently_used() {
        let cache = QueryCache::new(2);
        cache.put(fp("a"), entry(1)).await;
        cache.put(fp("b"), entry(1)).await;
        // Touch "a" so "b" becomes the LRU victim.
        assert!(cache.get(&fp("a"), 1).await.is_some());

        cache.put(fp("c"), entry(1)).await;
        assert!(cache.get(&fp("a"), 1).await.is_some());
        assert!(cache.get(&fp("b"), 1).await.is_none());
        assert!(cache.get(&fp("c"), 1).await.is_some());
    }

    #[tokio::test]
    async fn keyed_lock_serializes_same_fingerprint() {
        let cache = Arc::new(QueryCache::new(8));
        let guard = cache.lock_fingerprint(&fp("q")).await;

        let contender = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let _guard = cache.lock_fingerprint(&fp("q")).await;
            })
        };
        // The contender cannot finish while the guard is held.
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }
}
