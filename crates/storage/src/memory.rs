//! In-memory key-value backend.
//!
//! [`MemoryBackend`] implements [`KvBackend`] inside the process. It backs
//! single-node deployments and development, and is the base the test doubles
//! wrap.
//!
//! # Features
//!
//! - **Thread-safe**: a single [`parking_lot::RwLock`] guards all entries, so compare-and-set is
//!   linearizable
//! - **TTL support**: expired keys read as absent immediately; a background task reclaims them
//! - **Two shapes**: a key holds either a plain value or a hash
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - The sweeper runs every second, so memory is reclaimed lazily

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::KvBackend,
    error::{StorageError, StorageResult},
};

/// How often the background task sweeps expired keys.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // The receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Clone)]
enum Stored {
    Value(Bytes),
    Hash(HashMap<String, Bytes>),
}

#[derive(Debug, Clone)]
struct Entry {
    stored: Stored,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-memory backend.
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same data. The TTL sweeper stops when the last clone is dropped or when
/// [`shutdown`](KvBackend::shutdown) is called.
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<HashMap<String, Entry>>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend").field("keys", &self.data.read().len()).finish()
    }
}

impl MemoryBackend {
    /// Creates a new in-memory backend and spawns its TTL sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        let data = Arc::downgrade(&backend.data);
        tokio::spawn(async move {
            cleanup_expired_keys(data, shutdown_rx).await;
        });

        backend
    }

    /// Number of keys currently held, including expired keys not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns `true` if no keys are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn live_entry<'a>(data: &'a HashMap<String, Entry>, key: &str) -> Option<&'a Entry> {
        data.get(key).filter(|entry| entry.is_live(Instant::now()))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Background sweep of expired keys. Holds only a weak reference so the
/// data is freed with the last backend clone.
async fn cleanup_expired_keys(
    data: std::sync::Weak<RwLock<HashMap<String, Entry>>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(CLEANUP_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let Some(data) = data.upgrade() else {
            return;
        };
        let now = Instant::now();
        let mut guard = data.write();
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        let removed = before - guard.len();
        if removed > 0 {
            tracing::trace!(removed, "swept expired keys");
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        match Self::live_entry(&data, key) {
            None => Ok(None),
            Some(Entry { stored: Stored::Value(value), .. }) => Ok(Some(value.clone())),
            Some(_) => Err(StorageError::wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.data
            .write()
            .insert(key.to_owned(), Entry { stored: Stored::Value(value), expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let removed = self.data.write().remove(key);
        Ok(removed.is_some_and(|entry| entry.is_live(Instant::now())))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(Self::live_entry(&self.data.read(), key).is_some())
    }

    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        match Self::live_entry(&data, key) {
            None => Ok(None),
            Some(Entry { stored: Stored::Hash(hash), .. }) => Ok(hash.get(field).cloned()),
            Some(_) => Err(StorageError::wrong_type(key)),
        }
    }

    async fn hgetall(&self, key: &str) -> StorageResult<HashMap<String, Bytes>> {
        let data = self.data.read();
        match Self::live_entry(&data, key) {
            None => Ok(HashMap::new()),
            Some(Entry { stored: Stored::Hash(hash), .. }) => Ok(hash.clone()),
            Some(_) => Err(StorageError::wrong_type(key)),
        }
    }

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> StorageResult<()> {
        let mut data = self.data.write();
        let now = Instant::now();
        let entry = data.entry(key.to_owned()).or_insert_with(|| Entry {
            stored: Stored::Hash(HashMap::new()),
            expires_at: None,
        });
        if !entry.is_live(now) {
            *entry = Entry { stored: Stored::Hash(HashMap::new()), expires_at: None };
        }
        match &mut entry.stored {
            Stored::Hash(hash) => {
                hash.insert(field.to_owned(), value);
                Ok(())
            },
            Stored::Value(_) => Err(StorageError::wrong_type(key)),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        let mut data = self.data.write();
        let now = Instant::now();
        match data.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new_value: Bytes,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        let mut data = self.data.write();

        let current = match Self::live_entry(&data, key) {
            None => None,
            Some(Entry { stored: Stored::Value(value), .. }) => Some(value.clone()),
            Some(_) => return Err(StorageError::wrong_type(key)),
        };

        let matches = match (expected, &current) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == &cur[..],
            _ => false,
        };

        if !matches {
            return Err(StorageError::Conflict);
        }

        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        data.insert(key.to_owned(), Entry { stored: Stored::Value(new_value), expires_at });
        Ok(())
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();

        backend.set("key1", Bytes::from("value1"), None).await.unwrap();
        assert_eq!(backend.get("key1").await.unwrap(), Some(Bytes::from("value1")));
        assert!(backend.exists("key1").await.unwrap());

        assert!(backend.delete("key1").await.unwrap());
        assert_eq!(backend.get("key1").await.unwrap(), None);
        assert!(!backend.delete("key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let backend = MemoryBackend::new();

        backend.set("temp", Bytes::from("value"), Some(Duration::from_millis(50))).await.unwrap();
        assert!(backend.get("temp").await.unwrap().is_some());

        sleep(Duration::from_millis(80)).await;

        assert_eq!(backend.get("temp").await.unwrap(), None);
        assert!(!backend.exists("temp").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_clears_ttl() {
        let backend = MemoryBackend::new();

        backend.set("key", Bytes::from("temp"), Some(Duration::from_millis(50))).await.unwrap();
        backend.set("key", Bytes::from("permanent"), None).await.unwrap();

        sleep(Duration::from_millis(80)).await;

        assert_eq!(backend.get("key").await.unwrap(), Some(Bytes::from("permanent")));
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let backend = MemoryBackend::new();

        assert!(backend.hgetall("h").await.unwrap().is_empty());
        backend.hset("h", "a", Bytes::from("1")).await.unwrap();
        backend.hset("h", "b", Bytes::from("2")).await.unwrap();

        assert_eq!(backend.hget("h", "a").await.unwrap(), Some(Bytes::from("1")));
        assert_eq!(backend.hget("h", "missing").await.unwrap(), None);

        let all = backend.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("b"), Some(&Bytes::from("2")));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let backend = MemoryBackend::new();

        backend.set("plain", Bytes::from("v"), None).await.unwrap();
        backend.hset("hash", "f", Bytes::from("v")).await.unwrap();

        assert!(matches!(backend.hget("plain", "f").await, Err(StorageError::WrongType { .. })));
        assert!(matches!(backend.get("hash").await, Err(StorageError::WrongType { .. })));
        assert!(matches!(
            backend.hset("plain", "f", Bytes::new()).await,
            Err(StorageError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_expire_on_hash() {
        let backend = MemoryBackend::new();

        assert!(!backend.expire("missing", Duration::from_secs(1)).await.unwrap());

        backend.hset("h", "f", Bytes::from("v")).await.unwrap();
        assert!(backend.expire("h", Duration::from_millis(50)).await.unwrap());

        // hset on a live hash keeps its TTL.
        backend.hset("h", "g", Bytes::from("w")).await.unwrap();
        sleep(Duration::from_millis(80)).await;

        assert!(backend.hgetall("h").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_set_success() {
        let backend = MemoryBackend::new();

        backend.set("key", Bytes::from("value1"), None).await.unwrap();
        backend
            .compare_and_set("key", Some(b"value1".as_slice()), Bytes::from("value2"), None)
            .await
            .unwrap();

        assert_eq!(backend.get("key").await.unwrap(), Some(Bytes::from("value2")));
    }

    #[tokio::test]
    async fn test_compare_and_set_conflict() {
        let backend = MemoryBackend::new();

        backend.set("key", Bytes::from("value1"), None).await.unwrap();
        let result = backend
            .compare_and_set("key", Some(b"wrong".as_slice()), Bytes::from("value2"), None)
            .await;

        assert!(matches!(result, Err(StorageError::Conflict)));
        assert_eq!(backend.get("key").await.unwrap(), Some(Bytes::from("value1")));
    }

    #[tokio::test]
    async fn test_compare_and_set_insert_if_absent() {
        let backend = MemoryBackend::new();

        backend.compare_and_set("new_key", None, Bytes::from("value"), None).await.unwrap();
        assert_eq!(backend.get("new_key").await.unwrap(), Some(Bytes::from("value")));

        let again = backend.compare_and_set("new_key", None, Bytes::from("other"), None).await;
        assert!(matches!(again, Err(StorageError::Conflict)));
    }

    #[tokio::test]
    async fn test_compare_and_set_treats_expired_as_absent() {
        let backend = MemoryBackend::new();

        backend.set("key", Bytes::from("old"), Some(Duration::from_millis(20))).await.unwrap();
        sleep(Duration::from_millis(40)).await;

        backend.compare_and_set("key", None, Bytes::from("new"), None).await.unwrap();
        assert_eq!(backend.get("key").await.unwrap(), Some(Bytes::from("new")));
    }

    #[tokio::test]
    async fn test_concurrent_compare_and_set_single_winner() {
        let backend = MemoryBackend::new();
        backend.set("marker", Bytes::from("v0"), None).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..16 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend
                    .compare_and_set(
                        "marker",
                        Some(b"v0".as_slice()),
                        Bytes::from(format!("v{}", i + 1)),
                        None,
                    )
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_sweeper_reclaims_expired_keys() {
        let backend = MemoryBackend::new();
        backend.set("temp", Bytes::from("v"), Some(Duration::from_millis(10))).await.unwrap();

        sleep(CLEANUP_INTERVAL + Duration::from_millis(200)).await;

        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let backend = MemoryBackend::new();

        backend.shutdown().await;
        backend.shutdown().await;

        backend.set("key", Bytes::from("value"), None).await.unwrap();
        assert_eq!(backend.get("key").await.unwrap(), Some(Bytes::from("value")));
    }

    #[tokio::test]
    async fn test_clone_shares_data() {
        let backend1 = MemoryBackend::new();
        let backend2 = backend1.clone();

        backend1.set("key", Bytes::from("value"), None).await.unwrap();
        assert_eq!(backend2.get("key").await.unwrap(), Some(Bytes::from("value")));
    }
}
