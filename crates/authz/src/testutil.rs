//! Shared test utilities for permission checks.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! trustcore-authz = { path = "../authz", features = ["testutil"] }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use trustcore_storage::{
    CircuitBreakerConfig, ResilientStore, ResilientStoreConfig, StorageError, StorageResult,
    testutil::FlakyBackend,
};

use crate::{
    config::PermissionConfig,
    engine::PermissionEngine,
    grant::PermissionGrant,
    principal::Principal,
    repository::{GrantRepository, MemoryGrantRepository},
    role::Role,
};

/// A [`MemoryGrantRepository`] that can be switched to fail and counts
/// loads.
#[derive(Debug, Clone, Default)]
pub struct FlakyGrantRepository {
    inner: MemoryGrantRepository,
    failing: Arc<AtomicBool>,
    loads: Arc<AtomicUsize>,
}

impl FlakyGrantRepository {
    /// A healthy repository holding `grants`.
    #[must_use]
    pub fn new(grants: Vec<PermissionGrant>) -> Self {
        Self { inner: MemoryGrantRepository::new(grants), ..Self::default() }
    }

    /// Replaces every grant.
    pub fn replace(&self, grants: Vec<PermissionGrant>) {
        self.inner.replace(grants);
    }

    /// Makes every load fail with a connection error.
    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Restores normal behaviour.
    pub fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    /// Number of load attempts.
    #[must_use]
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GrantRepository for FlakyGrantRepository {
    async fn load(&self) -> StorageResult<Vec<PermissionGrant>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::connection("injected grant source failure"));
        }
        self.inner.load().await
    }
}

/// A small grant table covering every role.
///
/// | role | resource | action | condition |
/// |---|---|---|---|
/// | viewer | `document:*` | `document:read` | |
/// | member | `document:*` | `document:write` | same org |
/// | admin | `org:*` | `org:*` | |
/// | owner | `billing:*` | `billing:*` | |
/// | super_admin | `*` | `*` | |
///
/// # Panics
///
/// Never; every pattern is a valid constant.
#[must_use]
#[allow(clippy::expect_used)]
pub fn sample_grants() -> Vec<PermissionGrant> {
    let grant = |role: &str, resource: &str, action: &str| {
        PermissionGrant::new(role, resource, action).expect("valid grant")
    };
    vec![
        grant("viewer", "document:*", "document:read"),
        grant("member", "document:*", "document:write")
            .with_condition("resource.orgId == principal.orgId")
            .expect("valid condition"),
        grant("admin", "org:*", "org:*"),
        grant("owner", "billing:*", "billing:*"),
        grant("super_admin", "*", "*"),
    ]
}

/// A principal in org `acme`.
#[must_use]
pub fn principal(subject: &str, role: Role) -> Principal {
    Principal::builder().subject(subject).role(role).org_id("acme").build()
}

/// Breaker cooldown used by [`EngineHarness`].
pub const TEST_COOLDOWN: Duration = Duration::from_millis(100);

/// A [`PermissionEngine`] over a [`FlakyBackend`] and a
/// [`FlakyGrantRepository`] loaded with [`sample_grants`].
pub struct EngineHarness {
    /// Backend double for the decision cache.
    pub backend: FlakyBackend,
    /// Store shared by the engine.
    pub store: ResilientStore,
    /// Grant source double.
    pub repository: FlakyGrantRepository,
    /// Engine under test, grants already loaded.
    pub engine: Arc<PermissionEngine>,
}

impl EngineHarness {
    /// Harness with [`sample_grants`] loaded.
    ///
    /// # Panics
    ///
    /// Panics if the test store config is invalid or the grants fail to load.
    #[allow(clippy::expect_used)]
    pub async fn new() -> Self {
        let harness = Self::unloaded(sample_grants());
        harness.engine.refresh_grants().await.expect("load sample grants");
        harness
    }

    /// Harness whose engine has not loaded `grants` yet.
    ///
    /// # Panics
    ///
    /// Panics if the test store config is invalid.
    #[must_use]
    pub fn unloaded(grants: Vec<PermissionGrant>) -> Self {
        Self::build(grants, PermissionConfig::default())
    }

    /// Harness with [`sample_grants`] loaded and `config` applied.
    ///
    /// # Panics
    ///
    /// Panics if the test store config is invalid or the grants fail to load.
    #[allow(clippy::expect_used)]
    pub async fn with_config(config: PermissionConfig) -> Self {
        let harness = Self::build(sample_grants(), config);
        harness.engine.refresh_grants().await.expect("load sample grants");
        harness
    }

    #[allow(clippy::expect_used)]
    fn build(grants: Vec<PermissionGrant>, permissions: PermissionConfig) -> Self {
        let backend = FlakyBackend::new();
        let config = ResilientStoreConfig::builder()
            .breaker(
                CircuitBreakerConfig::builder()
                    .cooldown(TEST_COOLDOWN)
                    .build()
                    .expect("valid breaker config"),
            )
            .call_timeout(Duration::from_millis(50))
            .build()
            .expect("valid store config");
        let store = ResilientStore::new(Arc::new(backend.clone()), "flaky", config);
        let repository = FlakyGrantRepository::new(grants);
        let engine = Arc::new(
            PermissionEngine::builder()
                .store(store.clone())
                .repository(Arc::new(repository.clone()))
                .config(permissions)
                .build(),
        );
        Self { backend, store, repository, engine }
    }

    /// Drives the store's breaker open.
    pub async fn open_circuit(&self) {
        self.backend.fail();
        for i in 0..trustcore_storage::circuit_breaker::DEFAULT_FAILURE_THRESHOLD {
            let _ = self.store.get(&format!("harness:probe:{i}")).await;
        }
    }
}
