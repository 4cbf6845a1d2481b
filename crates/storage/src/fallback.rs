//! Bounded last-known-value cache used while the backend is unavailable.
//!
//! [`FallbackCache`] is populated only by successful backend reads of
//! present values. It is never filled by writes, and successful writes
//! invalidate the entries they touch. Capacity is enforced with LRU eviction.
//! Views of one backend key share a cache entry, so invalidating a key costs
//! one removal regardless of write volume.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use moka::{future::Cache, ops::compute::Op, policy::EvictionPolicy};

/// Default number of entries held by the fallback cache.
pub const DEFAULT_FALLBACK_CAPACITY: u64 = 1_000;

/// Which view of a backend key a cache entry records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A plain value read with `get`.
    Value,
    /// A single hash field read with `hget`.
    Field(String),
    /// A whole hash read with `hgetall`.
    Hash,
    /// A presence check read with `exists`.
    Exists,
}

/// Cache key: a backend key plus the view that was read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FallbackKey {
    /// The backend key.
    pub key: String,
    /// The view of that key.
    pub slot: Slot,
}

impl FallbackKey {
    /// Key for a plain value.
    #[must_use]
    pub fn value(key: &str) -> Self {
        Self { key: key.to_owned(), slot: Slot::Value }
    }

    /// Key for one hash field.
    #[must_use]
    pub fn field(key: &str, field: &str) -> Self {
        Self { key: key.to_owned(), slot: Slot::Field(field.to_owned()) }
    }

    /// Key for a whole hash.
    #[must_use]
    pub fn hash(key: &str) -> Self {
        Self { key: key.to_owned(), slot: Slot::Hash }
    }

    /// Key for a presence check.
    #[must_use]
    pub fn exists(key: &str) -> Self {
        Self { key: key.to_owned(), slot: Slot::Exists }
    }
}

/// A cached read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedValue {
    /// Bytes of a plain value or hash field.
    Bytes(Bytes),
    /// All fields of a hash.
    Hash(HashMap<String, Bytes>),
    /// Result of a presence check.
    Flag(bool),
}

/// A cached value with the time it was read from the backend.
#[derive(Debug, Clone)]
pub struct FallbackEntry {
    /// The value as last read.
    pub value: CachedValue,
    /// When the value was read.
    pub inserted_at: DateTime<Utc>,
}

/// Every cached view of one backend key.
type Views = HashMap<Slot, Arc<FallbackEntry>>;

/// Bounded LRU of last-known backend values.
///
/// Entries are grouped by backend key so a write drops all views of its key
/// with a single removal. Capacity counts views, not keys.
#[derive(Clone)]
pub struct FallbackCache {
    cache: Cache<String, Arc<Views>>,
}

impl std::fmt::Debug for FallbackCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackCache")
            .field("entries", &self.cache.weighted_size())
            .field("keys", &self.cache.entry_count())
            .field("capacity", &self.cache.policy().max_capacity())
            .finish()
    }
}

impl FallbackCache {
    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .weigher(|_key: &String, views: &Arc<Views>| {
                u32::try_from(views.len()).unwrap_or(u32::MAX)
            })
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { cache }
    }

    /// Looks up the last known value.
    pub async fn get(&self, key: &FallbackKey) -> Option<Arc<FallbackEntry>> {
        self.cache.get(&key.key).await.and_then(|views| views.get(&key.slot).cloned())
    }

    /// Records a value freshly read from the backend.
    pub async fn insert(&self, key: FallbackKey, value: CachedValue) {
        let entry = Arc::new(FallbackEntry { value, inserted_at: Utc::now() });
        let FallbackKey { key, slot } = key;
        self.cache
            .entry(key)
            .and_upsert_with(|existing| async move {
                let mut views = existing.map(|e| Views::clone(e.value())).unwrap_or_default();
                views.insert(slot, entry);
                Arc::new(views)
            })
            .await;
    }

    /// Drops a single entry.
    pub async fn invalidate(&self, key: &FallbackKey) {
        let slot = key.slot.clone();
        self.cache
            .entry_by_ref(&key.key)
            .and_compute_with(|existing| async move {
                let Some(existing) = existing else { return Op::Nop };
                if !existing.value().contains_key(&slot) {
                    return Op::Nop;
                }
                let mut views = Views::clone(existing.value());
                views.remove(&slot);
                if views.is_empty() { Op::Remove } else { Op::Put(Arc::new(views)) }
            })
            .await;
    }

    /// Drops every view of `key`.
    pub async fn invalidate_key(&self, key: &str) {
        self.cache.invalidate(key).await;
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries. Exact only after
    /// [`run_pending_tasks`](Self::run_pending_tasks).
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Applies pending evictions and invalidations.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl Default for FallbackCache {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_CAPACITY)
    }
}
