//! Ed25519 signing key material.
//!
//! Private key material lives only in [`SigningKeyPair`], wrapped in
//! [`Zeroizing`] so it is scrubbed on drop. Key lifecycle:
//!
//! ```text
//! generate ──► Active ──rotate──► Rotating ──grace elapsed──► Retired
//! ```
//!
//! Only `Active` and `Rotating` keys verify tokens; only the `Active` key
//! signs.

use std::{fmt, sync::Arc};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH, SigningKey};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::AuthError;

/// PKCS#8 v1 DER prefix for an Ed25519 private key; the 32-byte seed follows.
const PKCS8_ED25519_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
];

/// Random bytes in a generated key id.
const KID_BYTES: usize = 9;

/// Lifecycle status of a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Signs new tokens and verifies existing ones.
    Active,
    /// Verifies tokens during the grace window after a rotation.
    Rotating,
    /// Never used again.
    Retired,
}

impl KeyStatus {
    /// `true` for statuses that may verify tokens.
    #[must_use]
    pub fn verifies(self) -> bool {
        matches!(self, Self::Active | Self::Rotating)
    }
}

/// An Ed25519 key pair identified by `kid`.
///
/// `Debug` never prints the seed.
pub struct SigningKeyPair {
    kid: String,
    seed: Zeroizing<[u8; SECRET_KEY_LENGTH]>,
    public_key: [u8; PUBLIC_KEY_LENGTH],
    created_at: DateTime<Utc>,
}

impl SigningKeyPair {
    /// Generates a fresh key pair with a random `kid`.
    #[must_use]
    pub fn generate(created_at: DateTime<Utc>) -> Self {
        let mut kid_bytes = [0u8; KID_BYTES];
        OsRng.fill_bytes(&mut kid_bytes);
        let kid = format!("key-{}", URL_SAFE_NO_PAD.encode(kid_bytes));

        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, &signing_key, created_at)
    }

    /// Rebuilds a key pair from its persisted seed.
    #[must_use]
    pub fn from_seed(
        kid: impl Into<String>,
        seed: &[u8; SECRET_KEY_LENGTH],
        created_at: DateTime<Utc>,
    ) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self::from_signing_key(kid.into(), &signing_key, created_at)
    }

    fn from_signing_key(kid: String, signing_key: &SigningKey, created_at: DateTime<Utc>) -> Self {
        Self {
            kid,
            seed: Zeroizing::new(signing_key.to_bytes()),
            public_key: signing_key.verifying_key().to_bytes(),
            created_at,
        }
    }

    /// Key id carried in token headers.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// When the key was generated.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Raw public key bytes.
    #[must_use]
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.public_key
    }

    /// Public key as base64url without padding (the JWK `x` parameter).
    #[must_use]
    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.public_key)
    }

    /// The private seed. Only key repositories should read this.
    #[must_use]
    pub fn secret_seed(&self) -> &[u8; SECRET_KEY_LENGTH] {
        &self.seed
    }

    pub(crate) fn encoding_key(&self) -> EncodingKey {
        let mut der = Zeroizing::new(Vec::with_capacity(PKCS8_ED25519_PREFIX.len() + SECRET_KEY_LENGTH));
        der.extend_from_slice(&PKCS8_ED25519_PREFIX);
        der.extend_from_slice(&*self.seed);
        EncodingKey::from_ed_der(&der)
    }

    pub(crate) fn decoding_key(&self) -> Result<DecodingKey, AuthError> {
        DecodingKey::from_ed_components(&self.public_key_b64())
            .map_err(|e| AuthError::InvalidKeySet(format!("key {}: {e}", self.kid)))
    }
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("public_key", &self.public_key_b64())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// A key pair plus its lifecycle state.
#[derive(Debug, Clone)]
pub struct KeyEntry {
    /// The key pair.
    pub key: Arc<SigningKeyPair>,
    /// Current lifecycle status.
    pub status: KeyStatus,
    /// When the key stopped being the active key.
    pub rotated_at: Option<DateTime<Utc>>,
}

impl KeyEntry {
    /// Wraps a freshly generated key as the active key.
    #[must_use]
    pub fn active(key: SigningKeyPair) -> Self {
        Self { key: Arc::new(key), status: KeyStatus::Active, rotated_at: None }
    }

    /// Key id of the wrapped key.
    #[must_use]
    pub fn kid(&self) -> &str {
        self.key.kid()
    }
}
