//! Resilient key-value state access for the trust core.
//!
//! This crate provides the [`KvBackend`] capability trait and the
//! [`ResilientStore`] that wraps it. Token revocation records, refresh
//! family markers, and cached authorization decisions all go through one
//! shared `ResilientStore`, so circuit state is consistent across consumers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │            TokenService        PermissionEngine             │
//! │       (degraded policy lives here, per consumer)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     ResilientStore                          │
//! │    CircuitBreaker │ per-call timeout │ FallbackCache (LRU)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     KvBackend trait                         │
//! │   get/set/delete/exists/hget/hgetall/hset/expire/CAS        │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryBackend│          Redis or equivalent                 │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use trustcore_storage::{MemoryBackend, ReadOutcome, ResilientStore, ResilientStoreConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = ResilientStore::new(
//!         Arc::new(MemoryBackend::new()),
//!         "memory",
//!         ResilientStoreConfig::default(),
//!     );
//!
//!     let outcome = store.set("session:1", Bytes::from("alice"), None).await;
//!     assert!(outcome.is_applied());
//!     assert_eq!(store.get("session:1").await, ReadOutcome::Fresh(Some(Bytes::from("alice"))));
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: enables [`testutil::FlakyBackend`], a counting backend with switchable failure
//!   modes.
//! - **`failpoints`**: activates the `resilient-store-backend-call` failpoint.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod memory;
pub mod resilient;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use backend::KvBackend;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use config::ResilientStoreConfig;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use fallback::{CachedValue, FallbackCache, FallbackEntry, FallbackKey};
pub use health::{HealthMetadata, HealthStatus};
pub use memory::MemoryBackend;
pub use resilient::{ReadOutcome, ResilientStore, StoreMetrics, WriteOutcome};
