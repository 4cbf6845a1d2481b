//! Read-optimized signing key set.
//!
//! Verifiers load an immutable [`KeySnapshot`] through an [`ArcSwap`]; the
//! rotation task builds a new snapshot and swaps it in. A rotation never
//! blocks an in-flight verification, which keeps whichever snapshot it
//! loaded.

use std::{collections::HashMap, sync::Arc};

use arc_swap::ArcSwap;
use jsonwebtoken::{DecodingKey, EncodingKey};

use crate::{
    error::AuthError,
    jwks::{Jwk, Jwks},
    keys::{KeyEntry, KeyStatus},
};

struct Signer {
    kid: String,
    key: EncodingKey,
}

/// One immutable view of the key set.
pub struct KeySnapshot {
    entries: Vec<KeyEntry>,
    signer: Option<Signer>,
    verifiers: HashMap<String, Arc<DecodingKey>>,
}

impl KeySnapshot {
    fn build(entries: Vec<KeyEntry>) -> Result<Self, AuthError> {
        let mut signer = None;
        let mut verifiers = HashMap::with_capacity(entries.len());

        for entry in &entries {
            if entry.status == KeyStatus::Active {
                if signer.is_some() {
                    return Err(AuthError::InvalidKeySet("more than one active key".into()));
                }
                signer = Some(Signer { kid: entry.kid().to_owned(), key: entry.key.encoding_key() });
            }
            if entry.status.verifies() {
                let previous = verifiers
                    .insert(entry.kid().to_owned(), Arc::new(entry.key.decoding_key()?));
                if previous.is_some() {
                    return Err(AuthError::InvalidKeySet(format!("duplicate kid {}", entry.kid())));
                }
            }
        }

        Ok(Self { entries, signer, verifiers })
    }

    /// Every entry, retired ones included.
    #[must_use]
    pub fn entries(&self) -> &[KeyEntry] {
        &self.entries
    }

    /// Id of the active key.
    #[must_use]
    pub fn active_kid(&self) -> Option<&str> {
        self.signer.as_ref().map(|s| s.kid.as_str())
    }
}

/// Shared handle to the current key set.
pub struct KeyRing {
    snapshot: ArcSwap<KeySnapshot>,
}

impl KeyRing {
    /// An empty ring. Signing fails with [`AuthError::NoActiveKey`] until a
    /// key set is installed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(KeySnapshot {
                entries: Vec::new(),
                signer: None,
                verifiers: HashMap::new(),
            }),
        }
    }

    /// A ring holding `entries`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeySet`] if the entries hold more than one
    /// active key or unusable key material.
    pub fn from_entries(entries: Vec<KeyEntry>) -> Result<Self, AuthError> {
        Ok(Self { snapshot: ArcSwap::from_pointee(KeySnapshot::build(entries)?) })
    }

    /// Atomically replaces the key set. The previous set stays in effect if
    /// validation fails.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidKeySet`] on an invalid set.
    pub fn install(&self, entries: Vec<KeyEntry>) -> Result<(), AuthError> {
        let snapshot = KeySnapshot::build(entries)?;
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySnapshot> {
        self.snapshot.load_full()
    }

    /// Clones every entry of the current set.
    #[must_use]
    pub fn entries(&self) -> Vec<KeyEntry> {
        self.snapshot.load().entries.clone()
    }

    /// Id of the active key, if any.
    #[must_use]
    pub fn active_kid(&self) -> Option<String> {
        self.snapshot.load().active_kid().map(str::to_owned)
    }

    pub(crate) fn signer(&self) -> Result<(String, EncodingKey), AuthError> {
        let snapshot = self.snapshot.load();
        snapshot
            .signer
            .as_ref()
            .map(|s| (s.kid.clone(), s.key.clone()))
            .ok_or(AuthError::NoActiveKey)
    }

    pub(crate) fn verifier(&self, kid: &str) -> Option<Arc<DecodingKey>> {
        self.snapshot.load().verifiers.get(kid).cloned()
    }

    /// Public keys of every non-retired key.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let snapshot = self.snapshot.load();
        Jwks {
            keys: snapshot
                .entries
                .iter()
                .filter(|e| e.status.verifies())
                .map(|e| Jwk::from_key(&e.key))
                .collect(),
        }
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot.load();
        f.debug_struct("KeyRing")
            .field("active_kid", &snapshot.active_kid())
            .field("keys", &snapshot.entries.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::keys::SigningKeyPair;

    fn entry(status: KeyStatus) -> KeyEntry {
        KeyEntry {
            key: Arc::new(SigningKeyPair::generate(Utc::now())),
            status,
            rotated_at: (status != KeyStatus::Active).then(Utc::now),
        }
    }

    #[test]
    fn test_empty_ring_cannot_sign() {
        let ring = KeyRing::new();
        assert!(matches!(ring.signer(), Err(AuthError::NoActiveKey)));
        assert!(ring.jwks().keys.is_empty());
    }

    #[test]
    fn test_two_active_keys_rejected() {
        let result = KeyRing::from_entries(vec![entry(KeyStatus::Active), entry(KeyStatus::Active)]);
        assert!(matches!(result, Err(AuthError::InvalidKeySet(_))));
    }

    #[test]
    fn test_failed_install_keeps_previous_set() {
        let active = entry(KeyStatus::Active);
        let kid = active.kid().to_owned();
        let ring = KeyRing::from_entries(vec![active]).unwrap();

        let bad = vec![entry(KeyStatus::Active), entry(KeyStatus::Active)];
        assert!(ring.install(bad).is_err());
        assert_eq!(ring.active_kid().as_deref(), Some(kid.as_str()));
    }

    #[test]
    fn test_retired_keys_excluded_from_verification_and_jwks() {
        let active = entry(KeyStatus::Active);
        let rotating = entry(KeyStatus::Rotating);
        let retired = entry(KeyStatus::Retired);
        let (a, r, x) =
            (active.kid().to_owned(), rotating.kid().to_owned(), retired.kid().to_owned());

        let ring = KeyRing::from_entries(vec![active, rotating, retired]).unwrap();

        assert!(ring.verifier(&a).is_some());
        assert!(ring.verifier(&r).is_some());
        assert!(ring.verifier(&x).is_none());

        let jwks = ring.jwks();
        assert_eq!(jwks.keys.len(), 2);
        assert!(jwks.find(&x).is_none());
        assert_eq!(ring.entries().len(), 3);
    }

    #[test]
    fn test_snapshot_survives_install() {
        let ring = KeyRing::from_entries(vec![entry(KeyStatus::Active)]).unwrap();
        let held = ring.snapshot();
        let old_kid = held.active_kid().unwrap().to_owned();

        ring.install(vec![entry(KeyStatus::Active)]).unwrap();

        assert_eq!(held.active_kid(), Some(old_kid.as_str()));
        assert_ne!(ring.active_kid().unwrap(), old_kid);
    }
}
