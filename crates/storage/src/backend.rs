//! Key-value backend capability trait.
//!
//! [`KvBackend`] is the narrow surface the trust core needs from its shared
//! cache/store: plain values, hash fields, expiry, and an atomic
//! compare-and-set. Anything implementing it (a Redis client, the in-process
//! [`MemoryBackend`](crate::MemoryBackend), a test double) can sit behind
//! [`ResilientStore`](crate::ResilientStore).
//!
//! Keys are UTF-8 strings and values are opaque bytes. The backend knows
//! nothing about tokens or permissions.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Abstract key-value backend.
///
/// Implementations must be thread-safe and tolerate many concurrent callers.
/// A key holds either a plain value or a hash; operations of the wrong shape
/// fail with [`WrongType`](crate::StorageError::WrongType).
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](KvBackend::get) | Read a plain value |
/// | [`set`](KvBackend::set) | Write a plain value, optionally with a TTL |
/// | [`delete`](KvBackend::delete) | Remove a key of either shape |
/// | [`exists`](KvBackend::exists) | Test for presence |
/// | [`hget`](KvBackend::hget) | Read one hash field |
/// | [`hgetall`](KvBackend::hgetall) | Read every field of a hash |
/// | [`hset`](KvBackend::hset) | Write one hash field |
/// | [`expire`](KvBackend::expire) | Attach a TTL to an existing key |
/// | [`compare_and_set`](KvBackend::compare_and_set) | Atomic conditional write |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use trustcore_storage::{KvBackend, MemoryBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set("key", Bytes::from("value"), None).await.unwrap();
/// assert_eq!(backend.get("key").await.unwrap(), Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Retrieves a plain value. Expired or absent keys yield `Ok(None)`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>>;

    /// Stores a plain value, replacing whatever the key held before.
    ///
    /// `ttl: None` stores the value without expiry and clears any previous TTL.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()>;

    /// Removes a key. Returns whether a live key was removed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Returns `true` if a live key of any shape exists.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Reads a single field of a hash.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<Bytes>>;

    /// Reads every field of a hash. An absent key yields an empty map.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn hgetall(&self, key: &str) -> StorageResult<HashMap<String, Bytes>>;

    /// Writes a single field of a hash, creating the hash if needed.
    ///
    /// An existing TTL on the hash is preserved.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn hset(&self, key: &str, field: &str, value: Bytes) -> StorageResult<()>;

    /// Sets a TTL on an existing key. Returns `false` if the key is absent.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool>;

    /// Atomically replaces a plain value if it matches `expected`.
    ///
    /// - `expected: None` is insert-if-absent.
    /// - `expected: Some(v)` succeeds only on an exact byte match with the current value.
    ///
    /// A failed precondition returns [`Conflict`](crate::StorageError::Conflict).
    /// Concurrent CAS calls on the same key are linearizable: at most one
    /// caller observing a given current value can succeed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new_value: Bytes,
        ttl: Option<Duration>,
    ) -> StorageResult<()>;

    /// Releases backend resources (connections, background tasks).
    ///
    /// The default implementation does nothing.
    async fn shutdown(&self) {}
}
