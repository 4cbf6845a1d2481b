//! Background signing key rotation.
//!
//! [`KeyRotator`] owns every write to the [`KeyRing`]. Each change is
//! persisted to the [`SigningKeyRepository`] first and only then swapped into
//! the ring, so a failed save leaves the running key set untouched.
//!
//! Rotating keys are retired once a full grace period has passed without a
//! further rotation. Retired keys are dropped from the set at the next
//! rotation.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use trustcore_storage::StorageError;

use crate::{
    clock::{Clock, SystemClock},
    error::AuthError,
    keyring::KeyRing,
    keys::{KeyEntry, KeyStatus, SigningKeyPair},
    repository::SigningKeyRepository,
};

/// Longest pause between retirement sweeps of the background task.
const MAX_RETIRE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Generates, demotes, and retires signing keys.
pub struct KeyRotator {
    ring: Arc<KeyRing>,
    repository: Arc<dyn SigningKeyRepository>,
    clock: Arc<dyn Clock>,
    rotation_interval: Duration,
    grace_period: Duration,
    /// Serializes read-modify-write cycles on the key set.
    write_lock: tokio::sync::Mutex<()>,
    cancel_token: CancellationToken,
    task_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[bon::bon]
impl KeyRotator {
    /// Creates a rotator for `ring`. Call [`bootstrap`](Self::bootstrap)
    /// before issuing tokens.
    #[builder]
    pub fn new(
        ring: Arc<KeyRing>,
        repository: Arc<dyn SigningKeyRepository>,
        #[builder(default = Arc::new(SystemClock))] clock: Arc<dyn Clock>,
        rotation_interval: Duration,
        grace_period: Duration,
    ) -> Self {
        Self {
            ring,
            repository,
            clock,
            rotation_interval,
            grace_period,
            write_lock: tokio::sync::Mutex::new(()),
            cancel_token: CancellationToken::new(),
            task_handle: Mutex::new(None),
        }
    }
}

impl KeyRotator {
    /// Loads the persisted key set into the ring, generating and persisting
    /// a first key if the repository holds no active key.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BackendUnavailable`] if the repository cannot be
    /// read or written, or [`AuthError::InvalidKeySet`] if the persisted set
    /// is invalid.
    #[tracing::instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().await;

        let mut entries = self
            .repository
            .load()
            .await
            .map_err(|e| AuthError::backend_error("load signing keys", e))?;

        if entries.iter().any(|e| e.status == KeyStatus::Active) {
            self.ring.install(entries)?;
            tracing::info!(active_kid = ?self.ring.active_kid(), "signing keys loaded");
            return Ok(());
        }

        let key = SigningKeyPair::generate(self.clock.now());
        let kid = key.kid().to_owned();
        entries.push(KeyEntry::active(key));
        self.persist_and_install(entries).await?;

        tracing::info!(
            audit.action = "key.generate",
            audit.target = %kid,
            audit.result = "success",
            "initial signing key generated"
        );
        Ok(())
    }

    /// Generates a new active key and demotes the current one to rotating.
    ///
    /// Returns the new key id.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BackendUnavailable`] if the new set cannot be
    /// persisted. The ring keeps its previous set in that case.
    #[tracing::instrument(skip(self))]
    pub async fn rotate_now(&self) -> Result<String, AuthError> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();

        let mut entries: Vec<KeyEntry> = self
            .ring
            .entries()
            .into_iter()
            .filter(|e| e.status != KeyStatus::Retired)
            .collect();
        let mut demoted = Vec::new();
        for entry in &mut entries {
            if entry.status == KeyStatus::Active {
                entry.status = KeyStatus::Rotating;
                entry.rotated_at = Some(now);
                demoted.push(entry.kid().to_owned());
            }
        }

        let key = SigningKeyPair::generate(now);
        let kid = key.kid().to_owned();
        entries.push(KeyEntry::active(key));

        if let Err(err) = self.persist_and_install(entries).await {
            tracing::warn!(
                audit.action = "key.rotate",
                audit.result = "failure",
                error = %err,
                "signing key rotation failed"
            );
            return Err(err);
        }

        tracing::info!(
            audit.action = "key.rotate",
            audit.target = %kid,
            audit.result = "success",
            demoted = ?demoted,
            "signing key rotated"
        );
        Ok(kid)
    }

    /// Retires rotating keys once the grace period has elapsed since the
    /// most recent rotation. Returns how many keys were retired.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::BackendUnavailable`] if the new set cannot be
    /// persisted.
    #[tracing::instrument(skip(self))]
    pub async fn retire_expired(&self) -> Result<usize, AuthError> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now();

        let mut entries = self.ring.entries();
        let Some(last_rotation) = entries.iter().filter_map(|e| e.rotated_at).max() else {
            return Ok(0);
        };
        if !grace_elapsed(last_rotation, self.grace_period, now) {
            return Ok(0);
        }

        let mut retired = Vec::new();
        for entry in &mut entries {
            if entry.status == KeyStatus::Rotating {
                entry.status = KeyStatus::Retired;
                retired.push(entry.kid().to_owned());
            }
        }
        if retired.is_empty() {
            return Ok(0);
        }

        self.persist_and_install(entries).await?;
        for kid in &retired {
            tracing::info!(
                audit.action = "key.retire",
                audit.target = %kid,
                audit.result = "success",
                "signing key retired"
            );
        }
        Ok(retired.len())
    }

    async fn persist_and_install(&self, entries: Vec<KeyEntry>) -> Result<(), AuthError> {
        fail::fail_point!("key-rotation-before-save", |_| {
            Err(AuthError::backend_error(
                "save signing keys",
                StorageError::connection("injected repository failure"),
            ))
        });

        self.repository
            .save(&entries)
            .await
            .map_err(|e| AuthError::backend_error("save signing keys", e))?;
        self.ring.install(entries)
    }

    /// Starts the background task that rotates every `rotation_interval`
    /// and sweeps for retirable keys.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn start(self: &Arc<Self>) {
        let rotator = Arc::clone(self);
        let token = self.cancel_token.clone();
        let sweep_interval = self.grace_period.min(MAX_RETIRE_SWEEP_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut rotate_ticker = tokio::time::interval(rotator.rotation_interval);
            let mut sweep_ticker = tokio::time::interval(sweep_interval);
            // The first tick fires immediately; consume it so we start
            // with a full interval wait.
            rotate_ticker.tick().await;
            sweep_ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("key rotation task shutting down");
                        break;
                    }
                    _ = rotate_ticker.tick() => {
                        // Failures are logged inside; the next tick retries.
                        let _ = rotator.rotate_now().await;
                    }
                    _ = sweep_ticker.tick() => {
                        if let Err(err) = rotator.retire_expired().await {
                            tracing::warn!(error = %err, "key retirement sweep failed");
                        }
                    }
                }
            }
        });

        *self.task_handle.lock() = Some(handle);
    }

    /// Stops the background task and waits for it to finish.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let handle = self.task_handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::warn!(error = %err, "key rotation task panicked");
        }
    }

    /// The ring this rotator writes to.
    #[must_use]
    pub fn ring(&self) -> &Arc<KeyRing> {
        &self.ring
    }
}

impl std::fmt::Debug for KeyRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotator")
            .field("ring", &self.ring)
            .field("rotation_interval", &self.rotation_interval)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

fn grace_elapsed(rotated_at: DateTime<Utc>, grace: Duration, now: DateTime<Utc>) -> bool {
    match chrono::Duration::from_std(grace) {
        Ok(grace) => rotated_at + grace <= now,
        Err(_) => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{repository::MemorySigningKeyRepository, testutil::ManualClock};

    const GRACE: Duration = Duration::from_secs(3600);

    fn rotator() -> (KeyRotator, MemorySigningKeyRepository, ManualClock) {
        let repo = MemorySigningKeyRepository::new();
        let clock = ManualClock::new();
        let rotator = KeyRotator::builder()
            .ring(Arc::new(KeyRing::new()))
            .repository(Arc::new(repo.clone()))
            .clock(Arc::new(clock.clone()))
            .rotation_interval(Duration::from_secs(86_400))
            .grace_period(GRACE)
            .build();
        (rotator, repo, clock)
    }

    #[tokio::test]
    async fn test_bootstrap_generates_and_persists_first_key() {
        let (rotator, repo, _) = rotator();
        rotator.bootstrap().await.unwrap();

        assert!(rotator.ring().active_kid().is_some());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_bootstrap_reuses_persisted_keys() {
        let (first, repo, _) = rotator();
        first.bootstrap().await.unwrap();
        let kid = first.ring().active_kid().unwrap();

        let second = KeyRotator::builder()
            .ring(Arc::new(KeyRing::new()))
            .repository(Arc::new(repo.clone()))
            .rotation_interval(Duration::from_secs(60))
            .grace_period(GRACE)
            .build();
        second.bootstrap().await.unwrap();

        assert_eq!(second.ring().active_kid().unwrap(), kid);
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn test_rotate_demotes_previous_active() {
        let (rotator, _, _) = rotator();
        rotator.bootstrap().await.unwrap();
        let old = rotator.ring().active_kid().unwrap();

        let new = rotator.rotate_now().await.unwrap();
        assert_ne!(old, new);

        let entries = rotator.ring().entries();
        let status = |kid: &str| entries.iter().find(|e| e.kid() == kid).unwrap().status;
        assert_eq!(status(&old), KeyStatus::Rotating);
        assert_eq!(status(&new), KeyStatus::Active);
        assert_eq!(entries.iter().filter(|e| e.status == KeyStatus::Active).count(), 1);
    }

    #[tokio::test]
    async fn test_retire_waits_for_grace_period() {
        let (rotator, _, clock) = rotator();
        rotator.bootstrap().await.unwrap();
        rotator.rotate_now().await.unwrap();

        clock.advance(GRACE - Duration::from_secs(1));
        assert_eq!(rotator.retire_expired().await.unwrap(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(rotator.retire_expired().await.unwrap(), 1);
        assert_eq!(rotator.ring().jwks().keys.len(), 1);
    }

    #[tokio::test]
    async fn test_further_rotation_restarts_grace_period() {
        let (rotator, _, clock) = rotator();
        rotator.bootstrap().await.unwrap();
        rotator.rotate_now().await.unwrap();

        clock.advance(GRACE / 2);
        rotator.rotate_now().await.unwrap();
        clock.advance(GRACE / 2);
        assert_eq!(rotator.retire_expired().await.unwrap(), 0);

        clock.advance(GRACE / 2);
        assert_eq!(rotator.retire_expired().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retired_keys_pruned_on_next_rotation() {
        let (rotator, repo, clock) = rotator();
        rotator.bootstrap().await.unwrap();
        rotator.rotate_now().await.unwrap();
        clock.advance(GRACE);
        rotator.retire_expired().await.unwrap();
        assert_eq!(rotator.ring().entries().len(), 2);

        rotator.rotate_now().await.unwrap();
        assert_eq!(rotator.ring().entries().len(), 2);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn test_retire_without_rotation_is_noop() {
        let (rotator, _, clock) = rotator();
        rotator.bootstrap().await.unwrap();
        clock.advance(GRACE * 10);
        assert_eq!(rotator.retire_expired().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_task_rotates_on_interval() {
        let ring = Arc::new(KeyRing::new());
        let rotator = Arc::new(
            KeyRotator::builder()
                .ring(Arc::clone(&ring))
                .repository(Arc::new(MemorySigningKeyRepository::new()))
                .rotation_interval(Duration::from_secs(10))
                .grace_period(GRACE)
                .build(),
        );
        rotator.bootstrap().await.unwrap();
        let first = ring.active_kid().unwrap();

        rotator.start();
        tokio::time::sleep(Duration::from_secs(11)).await;
        rotator.shutdown().await;

        assert_ne!(ring.active_kid().unwrap(), first);
    }

    #[tokio::test]
    async fn test_shutdown_without_start_is_noop() {
        let (rotator, _, _) = rotator();
        rotator.shutdown().await;
    }
}
