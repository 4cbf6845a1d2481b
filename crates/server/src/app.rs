//! The composition root.

use std::sync::Arc;

use trustcore_authn::{KeyRing, KeyRotator, MemorySigningKeyRepository, TokenService};
use trustcore_authz::{MemoryGrantRepository, PermissionEngine};
use trustcore_storage::{KvBackend, MemoryBackend, ResilientStore};

use crate::{config::ServerConfig, error::InitError};

/// Every long-lived component, sharing one [`ResilientStore`].
pub struct TrustCore {
    store: ResilientStore,
    rotator: Arc<KeyRotator>,
    tokens: Arc<TokenService>,
    permissions: Arc<PermissionEngine>,
}

impl TrustCore {
    /// Builds the components over an in-process [`MemoryBackend`] and starts
    /// their background tasks.
    ///
    /// # Errors
    ///
    /// See [`init_with_backend`](Self::init_with_backend).
    pub async fn init(config: &ServerConfig) -> Result<Self, InitError> {
        Self::init_with_backend(config, Arc::new(MemoryBackend::new()), "memory").await
    }

    /// Builds the components over `backend` and starts their background
    /// tasks.
    ///
    /// A grant table that fails to load is logged and retried by the
    /// background refresher; checks fail until it loads.
    ///
    /// # Errors
    ///
    /// - [`InitError::Config`] if a config section is invalid
    /// - [`InitError::Keys`] if the signing key set cannot be bootstrapped
    #[tracing::instrument(skip_all, fields(backend = backend_name))]
    pub async fn init_with_backend(
        config: &ServerConfig,
        backend: Arc<dyn KvBackend>,
        backend_name: &str,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let store = ResilientStore::new(backend, backend_name, config.store);

        let ring = Arc::new(KeyRing::new());
        let rotator = Arc::new(
            KeyRotator::builder()
                .ring(Arc::clone(&ring))
                .repository(Arc::new(MemorySigningKeyRepository::new()))
                .rotation_interval(config.tokens.key_rotation_interval())
                .grace_period(config.tokens.key_grace_period())
                .build(),
        );
        rotator.bootstrap().await?;

        let tokens = Arc::new(
            TokenService::builder()
                .store(store.clone())
                .keys(ring)
                .config(config.tokens.clone())
                .build(),
        );

        let permissions = Arc::new(
            PermissionEngine::builder()
                .store(store.clone())
                .repository(Arc::new(MemoryGrantRepository::new(config.grants.clone())))
                .config(config.permissions)
                .build(),
        );
        match permissions.refresh_grants().await {
            Ok(0) => tracing::warn!("no grants configured, every check denies"),
            Ok(_) => {},
            Err(err) => tracing::warn!(error = %err, "initial grant load failed"),
        }

        rotator.start();
        permissions.start();
        tracing::info!("trust core started");

        Ok(Self { store, rotator, tokens, permissions })
    }

    /// Stops background tasks, then shuts the store down.
    pub async fn close(&self) {
        self.permissions.shutdown().await;
        self.rotator.shutdown().await;
        self.store.close().await;
        tracing::info!("trust core stopped");
    }

    /// The shared state store.
    #[must_use]
    pub fn store(&self) -> &ResilientStore {
        &self.store
    }

    /// Token issuance and verification.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Permission checks.
    #[must_use]
    pub fn permissions(&self) -> &Arc<PermissionEngine> {
        &self.permissions
    }

    /// Signing key rotation.
    #[must_use]
    pub fn rotator(&self) -> &Arc<KeyRotator> {
        &self.rotator
    }
}

impl std::fmt::Debug for TrustCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustCore")
            .field("store", &self.store)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}
