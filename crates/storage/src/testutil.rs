//! Test doubles for code built on [`KvBackend`].
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! trustcore-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    backend::KvBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
};

const MODE_HEALTHY: u8 = 0;
const MODE_FAILING: u8 = 1;
const MODE_HANGING: u8 = 2;

/// A [`MemoryBackend`] wrapper with switchable failure injection and a
/// call counter.
///
/// - [`fail`](Self::fail): every call returns a connection error.
/// - [`hang`](Self::hang): every call blocks far past any sane deadline.
/// - [`heal`](Self::heal): calls go through to the inner backend.
///
/// [`calls`](Self::calls) counts every invocation that reached the double,
/// whatever the mode, so tests can prove a breaker made zero calls.
#[derive(Clone, Debug)]
pub struct FlakyBackend {
    inner: MemoryBackend,
    calls: Arc<AtomicUsize>,
    mode: Arc<AtomicU8>,
}

impl FlakyBackend {
    /// Creates a healthy double over an empty [`MemoryBackend`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            mode: Arc::new(AtomicU8::new(MODE_HEALTHY)),
        }
    }

    /// The wrapped backend, for seeding data without counting calls.
    #[must_use]
    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    /// Number of calls that reached this backend.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes every call fail with a connection error.
    pub fn fail(&self) {
        self.mode.store(MODE_FAILING, Ordering::SeqCst);
    }

    /// Makes every call hang.
    pub fn hang(&self) {
        self.mode.store(MODE_HANGING, Ordering::SeqCst);
    }

    /// Restores normal behaviour.
    pub fn heal(&self) {
        self.mode.store(MODE_HEALTHY, Ordering::SeqCst);
    }

    async fn enter(&self) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode.load(Ordering::SeqCst) {
            MODE_FAILING => Err(StorageError::connection("injected failure")),
            MODE_HANGING => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(StorageError::timeout())
            },
            _ => Ok(()),
        }
    }
}

impl Default for FlakyBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for FlakyBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<Bytes>> {
        self.enter().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> StorageResult<()> {
        self.enter().await?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.enter().await?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.enter().await?;
        self.inner.exists(key).await
    }

    async fn hget(&self, key: &str, field: &str) -> StorageResult<Option<Bytes>> {
        self.enter().await?;
        self.inner.hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> StorageResult<HashMap<String, Bytes>> {
        self.enter().await?;
        self.inner.hgetall(key).await
    }

    async fn hset(&self, key: &str, field: &str, value: Bytes) -> StorageResult<()> {
        self.enter().await?;
        self.inner.hset(key, field, value).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        self.enter().await?;
        self.inner.expire(key, ttl).await
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new_value: Bytes,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        self.enter().await?;
        self.inner.compare_and_set(key, expected, new_value, ttl).await
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}
