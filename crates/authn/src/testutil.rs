//! Shared test utilities for token testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! trustcore-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! - [`ManualClock`]: a [`Clock`] that only moves when told to
//! - [`TestHarness`]: a bootstrapped [`TokenService`] over a [`FlakyBackend`]
//! - [`craft_raw_jwt`] / [`sign_raw_jwt`]: hand-built tokens for attack tests

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{Algorithm, Header};
use parking_lot::Mutex;
use trustcore_storage::{
    CircuitBreakerConfig, ResilientStore, ResilientStoreConfig, testutil::FlakyBackend,
};

use crate::{
    clock::Clock, config::TokenConfig, keyring::KeyRing, keys::SigningKeyPair,
    repository::MemorySigningKeyRepository, rotation::KeyRotator, service::TokenService,
};

/// Breaker cooldown used by [`TestHarness`].
pub const TEST_COOLDOWN: Duration = Duration::from_millis(100);
/// Per-call timeout used by [`TestHarness`].
pub const TEST_CALL_TIMEOUT: Duration = Duration::from_millis(50);

/// A [`Clock`] that only moves when told to. Clones share one time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// A clock at 2030-01-01T00:00:00Z.
    ///
    /// # Panics
    ///
    /// Never; the start instant is a valid constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let start = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().expect("valid instant");
        Self::starting_at(start)
    }

    /// A clock at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Moves the clock forward.
    ///
    /// # Panics
    ///
    /// Panics if `by` does not fit a `chrono::Duration`.
    #[allow(clippy::expect_used)]
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).expect("duration in range");
        *self.now.lock() += by;
    }

    /// Sets the clock.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A [`TokenService`] wired to a [`FlakyBackend`], a bootstrapped key ring,
/// and a [`ManualClock`].
///
/// The store uses [`TEST_COOLDOWN`] and [`TEST_CALL_TIMEOUT`] so breaker
/// scenarios run in milliseconds.
pub struct TestHarness {
    /// Backend double; call [`FlakyBackend::fail`] to simulate an outage.
    pub backend: FlakyBackend,
    /// Store shared by the service.
    pub store: ResilientStore,
    /// Key ring shared by the service and the rotator.
    pub ring: Arc<KeyRing>,
    /// Rotator for the ring.
    pub rotator: Arc<KeyRotator>,
    /// Clock shared by the service and the rotator.
    pub clock: ManualClock,
    /// Service under test.
    pub service: TokenService,
}

impl TestHarness {
    /// Harness with the default [`TokenConfig`].
    ///
    /// # Panics
    ///
    /// Panics if the key ring cannot be bootstrapped.
    pub async fn new() -> Self {
        Self::with_config(TokenConfig::default()).await
    }

    /// Harness with `config`.
    ///
    /// # Panics
    ///
    /// Panics if the test store config is invalid or the key ring cannot be
    /// bootstrapped.
    #[allow(clippy::expect_used)]
    pub async fn with_config(config: TokenConfig) -> Self {
        let backend = FlakyBackend::new();
        let store_config = ResilientStoreConfig::builder()
            .breaker(
                CircuitBreakerConfig::builder()
                    .cooldown(TEST_COOLDOWN)
                    .build()
                    .expect("valid breaker config"),
            )
            .call_timeout(TEST_CALL_TIMEOUT)
            .build()
            .expect("valid store config");
        let store = ResilientStore::new(Arc::new(backend.clone()), "flaky", store_config);

        let clock = ManualClock::new();
        let ring = Arc::new(KeyRing::new());
        let rotator = Arc::new(
            KeyRotator::builder()
                .ring(Arc::clone(&ring))
                .repository(Arc::new(MemorySigningKeyRepository::new()))
                .clock(Arc::new(clock.clone()))
                .rotation_interval(config.key_rotation_interval())
                .grace_period(config.key_grace_period())
                .build(),
        );
        rotator.bootstrap().await.expect("bootstrap signing keys");

        let service = TokenService::builder()
            .store(store.clone())
            .keys(Arc::clone(&ring))
            .config(config)
            .clock(Arc::new(clock.clone()))
            .build();

        Self { backend, store, ring, rotator, clock, service }
    }

    /// Drives the store's breaker open by failing the backend and issuing
    /// enough reads to reach the failure threshold.
    pub async fn open_circuit(&self) {
        self.backend.fail();
        for i in 0..trustcore_storage::circuit_breaker::DEFAULT_FAILURE_THRESHOLD {
            let _ = self.store.get(&format!("harness:probe:{i}")).await;
        }
    }
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. Use it to check rejection of `alg: "none"`,
/// algorithm confusion, and malformed tokens.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[allow(clippy::expect_used)]
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Signs arbitrary claims JSON with `key`, using `kid` in the header.
///
/// Lets tests produce correctly signed tokens with claims the service would
/// never issue (wrong issuer, missing fields, foreign kid).
///
/// # Panics
///
/// Panics if encoding fails.
#[allow(clippy::expect_used)]
pub fn sign_raw_jwt(key: &SigningKeyPair, kid: &str, claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(kid.to_owned());
    jsonwebtoken::encode(&header, claims, &key.encoding_key()).expect("Failed to encode test JWT")
}

/// Asserts that a [`Result<T, AuthError>`](crate::AuthError) is an `Err`
/// matching the given variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use trustcore_authn::assert_auth_error;
/// use trustcore_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
