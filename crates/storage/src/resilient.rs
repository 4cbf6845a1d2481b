//! Circuit-breaking, timeboxed access to the shared backend.
//!
//! [`ResilientStore`] funnels every backend call through one
//! [`CircuitBreaker`] and one [`FallbackCache`]:
//!
//! - While the circuit is closed or half-open, the call runs under a per-call deadline. A timeout,
//!   connection error, or cancellation counts as a breaker failure.
//! - While the circuit is open, the backend is never called. Reads answer from the fallback cache
//!   ([`ReadOutcome::Cached`]) or report [`ReadOutcome::Unknown`]; writes return
//!   [`WriteOutcome::Rejected`] immediately.
//!
//! Reads never return errors. Writes return a `#[must_use]` outcome so callers have to decide
//! what an unpersisted write means for them. The store knows nothing about what its keys mean.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    backend::KvBackend,
    circuit_breaker::{CircuitBreaker, CircuitState},
    config::ResilientStoreConfig,
    error::{StorageError, StorageResult},
    fallback::{CachedValue, FallbackCache, FallbackKey},
    health::{HealthMetadata, HealthStatus},
};

/// Result of a read through the resilient store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    /// The backend answered.
    Fresh(T),
    /// The backend was unavailable; this is the last value read for the key.
    Cached(T),
    /// The backend was unavailable and nothing is cached for the key.
    Unknown,
}

impl<T> ReadOutcome<T> {
    /// `true` unless the backend answered.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Fresh(_))
    }

    /// `true` when the value came from the fallback cache.
    #[must_use]
    pub fn from_cache(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    /// Borrows the value, if one is known.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fresh(v) | Self::Cached(v) => Some(v),
            Self::Unknown => None,
        }
    }

    /// Consumes the outcome, returning the value if one is known.
    #[must_use]
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Fresh(v) | Self::Cached(v) => Some(v),
            Self::Unknown => None,
        }
    }

    /// Maps the carried value, keeping its provenance.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ReadOutcome<U> {
        match self {
            Self::Fresh(v) => ReadOutcome::Fresh(f(v)),
            Self::Cached(v) => ReadOutcome::Cached(f(v)),
            Self::Unknown => ReadOutcome::Unknown,
        }
    }
}

/// Result of a write through the resilient store.
#[derive(Debug, Clone)]
#[must_use = "a write may not have been persisted; check the outcome"]
pub enum WriteOutcome {
    /// The backend applied the write.
    Applied,
    /// A compare-and-set precondition did not hold; nothing was written.
    Conflict,
    /// The circuit is open; the backend was not called.
    Rejected,
    /// The backend call failed or timed out. The write may or may not have
    /// been applied.
    Failed(StorageError),
}

impl WriteOutcome {
    /// `true` if the backend applied the write.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// `true` if a compare-and-set lost.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }

    /// `true` if persistence did not happen because the backend is unavailable.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Rejected | Self::Failed(_))
    }
}

/// Counters and breaker state for external monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreMetrics {
    /// Current circuit state.
    pub state: CircuitState,
    /// Operations requested through the store.
    pub total: u64,
    /// Backend calls that completed (including permanent errors).
    pub success: u64,
    /// Backend calls that failed transiently, timed out, or were cancelled.
    pub failure: u64,
    /// Operations answered on the degraded path.
    pub fallback: u64,
    /// Degraded reads answered from the fallback cache.
    pub cache_hit: u64,
    /// Degraded reads with nothing cached.
    pub cache_miss: u64,
    /// Operations rejected without calling the backend.
    pub short_circuited: u64,
    /// Current consecutive failure count.
    pub consecutive_failures: u32,
    /// Current consecutive half-open success count.
    pub consecutive_successes: u32,
    /// Wall-clock time of the most recent failure.
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Approximate number of fallback cache entries.
    pub fallback_entries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    fallback: AtomicU64,
    cache_hit: AtomicU64,
    cache_miss: AtomicU64,
    short_circuited: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

enum CallError {
    ShortCircuited,
    Failed(StorageError),
}

/// Records a breaker failure if a backend call is dropped before it
/// completes (caller cancellation or an enclosing deadline).
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    counters: &'a Counters,
    operation: &'static str,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.record_failure();
            Counters::bump(&self.counters.failure);
            tracing::warn!(operation = self.operation, "backend call cancelled in flight");
        }
    }
}

/// Shared, resilient handle to a [`KvBackend`].
///
/// Cloning is cheap; clones share the breaker, the fallback cache, and the
/// counters, so every consumer sees one consistent view of backend health.
#[derive(Clone)]
pub struct ResilientStore {
    backend: Arc<dyn KvBackend>,
    backend_name: Arc<str>,
    breaker: CircuitBreaker,
    fallback: FallbackCache,
    call_timeout: Duration,
    counters: Arc<Counters>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for ResilientStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientStore")
            .field("backend", &self.backend_name)
            .field("state", &self.breaker.state())
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

impl ResilientStore {
    /// Wraps `backend` with the given resilience settings.
    pub fn new(
        backend: Arc<dyn KvBackend>,
        backend_name: impl Into<Arc<str>>,
        config: ResilientStoreConfig,
    ) -> Self {
        Self {
            backend,
            backend_name: backend_name.into(),
            breaker: CircuitBreaker::new(config.breaker()),
            fallback: FallbackCache::new(config.fallback_capacity()),
            call_timeout: config.call_timeout(),
            counters: Arc::new(Counters::default()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// `true` while the circuit is not closed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.state() != CircuitState::Closed
    }

    /// Reads a plain value.
    pub async fn get(&self, key: &str) -> ReadOutcome<Option<Bytes>> {
        let slot = FallbackKey::value(key);
        match self.call("get", self.backend.get(key)).await {
            Ok(Some(value)) => {
                self.fallback.insert(slot, CachedValue::Bytes(value.clone())).await;
                ReadOutcome::Fresh(Some(value))
            },
            Ok(None) => {
                self.fallback.invalidate(&slot).await;
                ReadOutcome::Fresh(None)
            },
            Err(_) => self
                .degraded_read(&slot, |cached| match cached {
                    CachedValue::Bytes(b) => Some(Some(b)),
                    _ => None,
                })
                .await,
        }
    }

    /// Checks whether a key exists.
    pub async fn exists(&self, key: &str) -> ReadOutcome<bool> {
        let slot = FallbackKey::exists(key);
        match self.call("exists", self.backend.exists(key)).await {
            Ok(true) => {
                self.fallback.insert(slot, CachedValue::Flag(true)).await;
                ReadOutcome::Fresh(true)
            },
            Ok(false) => {
                self.fallback.invalidate(&slot).await;
                ReadOutcome::Fresh(false)
            },
            Err(_) => self
                .degraded_read(&slot, |cached| match cached {
                    CachedValue::Flag(flag) => Some(flag),
                    _ => None,
                })
                .await,
        }
    }

    /// Reads one field of a hash.
    pub async fn hget(&self, key: &str, field: &str) -> ReadOutcome<Option<Bytes>> {
        let slot = FallbackKey::field(key, field);
        match self.call("hget", self.backend.hget(key, field)).await {
            Ok(Some(value)) => {
                self.fallback.insert(slot, CachedValue::Bytes(value.clone())).await;
                ReadOutcome::Fresh(Some(value))
            },
            Ok(None) => {
                self.fallback.invalidate(&slot).await;
                ReadOutcome::Fresh(None)
            },
            Err(_) => self
                .degraded_read(&slot, |cached| match cached {
                    CachedValue::Bytes(b) => Some(Some(b)),
                    _ => None,
                })
                .await,
        }
    }

    /// Reads every field of a hash.
    pub async fn hgetall(&self, key: &str) -> ReadOutcome<HashMap<String, Bytes>> {
        let slot = FallbackKey::hash(key);
        match self.call("hgetall", self.backend.hgetall(key)).await {
            Ok(fields) if fields.is_empty() => {
                self.fallback.invalidate(&slot).await;
                ReadOutcome::Fresh(fields)
            },
            Ok(fields) => {
                self.fallback.insert(slot, CachedValue::Hash(fields.clone())).await;
                ReadOutcome::Fresh(fields)
            },
            Err(_) => self
                .degraded_read(&slot, |cached| match cached {
                    CachedValue::Hash(fields) => Some(fields),
                    _ => None,
                })
                .await,
        }
    }

    /// Writes a plain value.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> WriteOutcome {
        let outcome = self.write("set", self.backend.set(key, value, ttl)).await;
        self.invalidate_after(key, &outcome).await;
        outcome
    }

    /// Deletes a key.
    pub async fn delete(&self, key: &str) -> WriteOutcome {
        let outcome = self.write("delete", async { self.backend.delete(key).await.map(drop) }).await;
        self.invalidate_after(key, &outcome).await;
        outcome
    }

    /// Writes one hash field.
    pub async fn hset(&self, key: &str, field: &str, value: Bytes) -> WriteOutcome {
        let outcome = self.write("hset", self.backend.hset(key, field, value)).await;
        self.invalidate_after(key, &outcome).await;
        outcome
    }

    /// Attaches a TTL to an existing key.
    pub async fn expire(&self, key: &str, ttl: Duration) -> WriteOutcome {
        let outcome =
            self.write("expire", async { self.backend.expire(key, ttl).await.map(drop) }).await;
        self.invalidate_after(key, &outcome).await;
        outcome
    }

    /// Atomically replaces a plain value if it equals `expected`
    /// (`None` means insert-if-absent).
    pub async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new_value: Bytes,
        ttl: Option<Duration>,
    ) -> WriteOutcome {
        let outcome = self
            .write("compare_and_set", self.backend.compare_and_set(key, expected, new_value, ttl))
            .await;
        self.invalidate_after(key, &outcome).await;
        outcome
    }

    /// Drops every fallback entry for `key`.
    pub async fn invalidate(&self, key: &str) {
        self.fallback.invalidate_key(key).await;
    }

    /// Snapshot of counters and breaker state.
    #[must_use]
    pub fn metrics(&self) -> StoreMetrics {
        let breaker = self.breaker.metrics();
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StoreMetrics {
            state: breaker.state,
            total: load(&self.counters.total),
            success: load(&self.counters.success),
            failure: load(&self.counters.failure),
            fallback: load(&self.counters.fallback),
            cache_hit: load(&self.counters.cache_hit),
            cache_miss: load(&self.counters.cache_miss),
            short_circuited: load(&self.counters.short_circuited),
            consecutive_failures: breaker.consecutive_failures,
            consecutive_successes: breaker.consecutive_successes,
            last_failure_at: breaker.last_failure_at,
            fallback_entries: self.fallback.entry_count(),
        }
    }

    /// Health derived from the circuit state.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        let start = Instant::now();
        let m = self.metrics();
        let meta = HealthMetadata::new(start.elapsed(), self.backend_name.as_ref())
            .with_detail("circuit_state", m.state.to_string())
            .with_detail("consecutive_failures", m.consecutive_failures.to_string())
            .with_detail("fallback_entries", m.fallback_entries.to_string());
        if self.closed.load(Ordering::Acquire) {
            return HealthStatus::unhealthy(meta, "store closed");
        }
        match m.state {
            CircuitState::Closed => HealthStatus::healthy(meta),
            CircuitState::HalfOpen => HealthStatus::degraded(meta, "circuit half-open"),
            CircuitState::Open => HealthStatus::unhealthy(meta, "circuit open"),
        }
    }

    /// Shuts the backend down. Later operations are short-circuited.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.backend.shutdown().await;
        self.fallback.clear();
        tracing::info!(backend = %self.backend_name, "resilient store closed");
    }

    /// Runs one backend call under the breaker and the per-call deadline.
    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, CallError>
    where
        F: Future<Output = StorageResult<T>> + Send,
    {
        Counters::bump(&self.counters.total);

        if self.closed.load(Ordering::Acquire) || !self.breaker.allow_request() {
            Counters::bump(&self.counters.short_circuited);
            tracing::debug!(operation, "backend call short-circuited");
            return Err(CallError::ShortCircuited);
        }

        let guard = InFlight {
            breaker: &self.breaker,
            counters: &self.counters,
            operation,
            armed: true,
        };
        let result = tokio::time::timeout(self.call_timeout, async {
            fail::fail_point!("resilient-store-backend-call", |_| {
                Err(StorageError::connection("injected backend failure"))
            });
            fut.await
        })
        .await;
        guard.disarm();

        match result {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Counters::bump(&self.counters.success);
                Ok(value)
            },
            Ok(Err(e)) if e.is_transient() => {
                self.breaker.record_failure();
                Counters::bump(&self.counters.failure);
                tracing::warn!(operation, error = %e, "backend call failed");
                Err(CallError::Failed(e))
            },
            Ok(Err(e)) => {
                // The backend answered; a permanent error says nothing about its health.
                self.breaker.record_success();
                Counters::bump(&self.counters.success);
                if !matches!(e, StorageError::Conflict) {
                    tracing::warn!(operation, error = %e, "backend rejected operation");
                }
                Err(CallError::Failed(e))
            },
            Err(_) => {
                self.breaker.record_failure();
                Counters::bump(&self.counters.failure);
                tracing::warn!(
                    operation,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "backend call timed out",
                );
                Err(CallError::Failed(StorageError::timeout()))
            },
        }
    }

    async fn degraded_read<T>(
        &self,
        slot: &FallbackKey,
        decode: impl FnOnce(CachedValue) -> Option<T>,
    ) -> ReadOutcome<T> {
        Counters::bump(&self.counters.fallback);
        let cached = self.fallback.get(slot).await.and_then(|entry| decode(entry.value.clone()));
        match cached {
            Some(value) => {
                Counters::bump(&self.counters.cache_hit);
                tracing::debug!(key = %slot.key, "served read from fallback cache");
                ReadOutcome::Cached(value)
            },
            None => {
                Counters::bump(&self.counters.cache_miss);
                tracing::debug!(key = %slot.key, "fallback cache miss");
                ReadOutcome::Unknown
            },
        }
    }

    async fn write<F>(&self, operation: &'static str, fut: F) -> WriteOutcome
    where
        F: Future<Output = StorageResult<()>> + Send,
    {
        match self.call(operation, fut).await {
            Ok(()) => WriteOutcome::Applied,
            Err(CallError::Failed(StorageError::Conflict)) => WriteOutcome::Conflict,
            Err(CallError::ShortCircuited) => {
                Counters::bump(&self.counters.fallback);
                WriteOutcome::Rejected
            },
            Err(CallError::Failed(e)) => {
                if e.is_transient() {
                    Counters::bump(&self.counters.fallback);
                }
                WriteOutcome::Failed(e)
            },
        }
    }

    async fn invalidate_after(&self, key: &str, outcome: &WriteOutcome) {
        if !matches!(outcome, WriteOutcome::Rejected) {
            self.fallback.invalidate_key(key).await;
        }
    }
}
