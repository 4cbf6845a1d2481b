//! JSON Web Key Set types for publishing verification keys.

use serde::{Deserialize, Serialize};

use crate::keys::SigningKeyPair;

/// Intended use of a published key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    /// Signature verification.
    Sig,
}

/// A single Ed25519 public key in JWK (RFC 8037 OKP) form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `OKP`.
    pub kty: String,
    /// Key id matching token headers.
    pub kid: String,
    /// Algorithm, always `EdDSA`.
    pub alg: String,
    /// Intended use.
    #[serde(rename = "use")]
    pub use_field: KeyUse,
    /// Curve, always `Ed25519`.
    pub crv: String,
    /// Public key, base64url without padding.
    pub x: String,
}

impl Jwk {
    /// Public JWK for `key`. Never includes private material.
    #[must_use]
    pub fn from_key(key: &SigningKeyPair) -> Self {
        Self {
            kty: "OKP".to_owned(),
            kid: key.kid().to_owned(),
            alg: "EdDSA".to_owned(),
            use_field: KeyUse::Sig,
            crv: "Ed25519".to_owned(),
            x: key.public_key_b64(),
        }
    }
}

/// A key set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// Published keys.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Looks up a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn jwk_has_okp_shape_and_no_private_fields() {
        let key = SigningKeyPair::generate(Utc::now());
        let value = serde_json::to_value(Jwk::from_key(&key)).expect("serialize");

        assert_eq!(value["kty"], "OKP");
        assert_eq!(value["crv"], "Ed25519");
        assert_eq!(value["alg"], "EdDSA");
        assert_eq!(value["use"], "sig");
        assert_eq!(value["kid"], key.kid());
        assert_eq!(value["x"], key.public_key_b64());
        assert!(value.get("d").is_none());
        assert!(value.get("n").is_none());
    }

    #[test]
    fn jwks_roundtrip() {
        let key = SigningKeyPair::generate(Utc::now());
        let jwks = Jwks { keys: vec![Jwk::from_key(&key)] };

        let serialized = serde_json::to_string(&jwks).expect("serialize");
        let decoded: Jwks = serde_json::from_str(&serialized).expect("deserialize");
        assert_eq!(decoded, jwks);
        assert!(decoded.find(key.kid()).is_some());
        assert!(decoded.find("missing").is_none());
    }
}
