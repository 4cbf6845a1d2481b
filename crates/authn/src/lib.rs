//! # Trust Core Authentication
//!
//! Token lifecycle for the trust core: issuance, verification, refresh
//! rotation with reuse detection, revocation, and signing key rotation.
//!
//! This crate provides:
//! - **[`TokenService`]**: issue, verify, rotate, and revoke EdDSA-signed JWTs
//! - **[`KeyRing`]**: lock-free snapshot of active and rotating keys
//! - **[`KeyRotator`]**: background rotation and grace-period retirement
//! - **[`Jwks`]**: public key publication for external verifiers
//!
//! ## Security
//!
//! - Only EdDSA (Ed25519) is accepted; `none` and symmetric algorithms are
//!   rejected before any key lookup
//! - Private key material is zeroized on drop and never serialized
//! - A superseded refresh token revokes its whole family
//!
//! ## Degraded mode
//!
//! Revocation lookups go through a shared
//! [`ResilientStore`](trustcore_storage::ResilientStore). When it cannot
//! answer, verification succeeds with [`VerifiedToken::degraded`] set rather
//! than failing open silently or failing closed.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use trustcore_authn::{
//!     IssueRequest, KeyRing, KeyRotator, MemorySigningKeyRepository, TokenConfig, TokenService,
//! };
//! use trustcore_storage::{MemoryBackend, ResilientStore, ResilientStoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ResilientStore::new(
//!     Arc::new(MemoryBackend::new()),
//!     "memory",
//!     ResilientStoreConfig::default(),
//! );
//! let config = TokenConfig::default();
//! let ring = Arc::new(KeyRing::new());
//! let rotator = KeyRotator::builder()
//!     .ring(Arc::clone(&ring))
//!     .repository(Arc::new(MemorySigningKeyRepository::new()))
//!     .rotation_interval(config.key_rotation_interval())
//!     .grace_period(config.key_grace_period())
//!     .build();
//! rotator.bootstrap().await?;
//!
//! let tokens = TokenService::builder().store(store).keys(ring).config(config).build();
//! let pair = tokens.issue_pair(&IssueRequest::builder().subject("user-42").build()).await?;
//! let verified = tokens.verify_access(&pair.access_token).await?;
//! assert_eq!(verified.principal().subject, "user-42");
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: [`testutil::ManualClock`], [`testutil::TestHarness`], and token crafting
//!   helpers.
//! - **`failpoints`**: activates the `key-rotation-before-save` failpoint and the storage
//!   failpoints.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Token claims and principals.
pub mod claims;
/// Wall-clock abstraction.
pub mod clock;
/// Token and key rotation configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// JSON Web Key Set types.
pub mod jwks;
/// JWT encoding and signature checks.
pub mod jwt;
/// Read-optimized key set.
pub mod keyring;
/// Ed25519 key material.
pub mod keys;
/// Signing key persistence.
pub mod repository;
/// Revocation records and audit sink.
pub mod revocation;
/// Background key rotation.
pub mod rotation;
/// Token lifecycle service.
pub mod service;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Header validation.
pub mod validation;

pub use claims::{IssueRequest, Principal, TokenClaims, TokenPair, TokenType, VerifiedToken};
pub use clock::{Clock, SystemClock};
pub use config::TokenConfig;
pub use error::{AuthError, Result};
pub use jwks::{Jwk, Jwks};
pub use keyring::KeyRing;
pub use keys::{KeyEntry, KeyStatus, SigningKeyPair};
pub use repository::{MemorySigningKeyRepository, SigningKeyRepository};
pub use revocation::{
    RevocationAuditSink, RevocationOutcome, RevocationReason, RevocationRecord, RevocationTarget,
    TracingAuditSink,
};
pub use rotation::KeyRotator;
pub use service::TokenService;
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
