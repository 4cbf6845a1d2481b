//! Authentication error types.
//!
//! Token-format and signature errors are terminal for the token that caused
//! them. Only [`AuthError::BackendUnavailable`] is worth retrying.

use thiserror::Error;
use trustcore_storage::StorageError;

use crate::claims::TokenType;

/// Errors produced while issuing, verifying, rotating, or revoking tokens.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The token cannot be parsed as a compact JWT with the expected claims.
    #[error("Malformed token: {message}")]
    MalformedToken {
        /// What was wrong with the token.
        message: String,
    },

    /// The header names an algorithm outside the allow-list.
    #[error("Unsupported algorithm: {message}")]
    UnsupportedAlgorithm {
        /// Why the algorithm was refused.
        message: String,
    },

    /// The header names a key that is not active or rotating.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key ID from the token header.
        kid: String,
    },

    /// Signature verification failed.
    #[error("Invalid signature")]
    SignatureInvalid,

    /// The token's `exp` has passed.
    #[error("Token expired")]
    TokenExpired,

    /// A revocation record covers this token.
    #[error("Token revoked")]
    TokenRevoked,

    /// The token is valid but of the wrong kind for this operation.
    #[error("Wrong token type: expected {expected}, got {actual}")]
    WrongTokenType {
        /// Type the operation accepts.
        expected: TokenType,
        /// Type found in the claims.
        actual: TokenType,
    },

    /// The `iss` claim does not match the configured issuer.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// The `aud` claim does not match the configured audience.
    #[error("Invalid audience: {0}")]
    InvalidAudience(String),

    /// The key ring has no active key to sign with.
    #[error("No active signing key")]
    NoActiveKey,

    /// A key set violates the single-active-key invariant or holds
    /// unusable key material.
    #[error("Invalid key set: {0}")]
    InvalidKeySet(String),

    /// Generating or encoding key material failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Encoding a token failed.
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// A decision needed the state store and the store could not answer.
    #[error("State backend unavailable: {message}")]
    BackendUnavailable {
        /// What could not be read or written.
        message: String,
        /// The storage error, when the backend was actually reached.
        #[source]
        source: Option<StorageError>,
    },
}

impl AuthError {
    /// Creates a [`AuthError::MalformedToken`].
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken { message: message.into() }
    }

    /// Creates a [`AuthError::UnsupportedAlgorithm`].
    #[must_use]
    pub fn unsupported_algorithm(message: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm { message: message.into() }
    }

    /// Creates a [`AuthError::KeyNotFound`].
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a [`AuthError::BackendUnavailable`] without a storage source.
    #[must_use]
    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::BackendUnavailable { message: message.into(), source: None }
    }

    /// Creates a [`AuthError::BackendUnavailable`] wrapping a storage error.
    #[must_use]
    pub fn backend_error(message: impl Into<String>, source: StorageError) -> Self {
        Self::BackendUnavailable { message: message.into(), source: Some(source) }
    }

    /// `true` if retrying the same request later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidAlgorithm => {
                AuthError::unsupported_algorithm("algorithm does not match the signing key")
            },
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer("issuer validation failed".into()),
            ErrorKind::InvalidAudience => {
                AuthError::InvalidAudience("audience validation failed".into())
            },
            ErrorKind::InvalidToken => AuthError::malformed_token("invalid JWT structure"),
            _ => AuthError::malformed_token(format!("JWT error: {err}")),
        }
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AuthError::malformed_token("bad").to_string(), "Malformed token: bad");
        assert_eq!(AuthError::TokenExpired.to_string(), "Token expired");
        assert_eq!(AuthError::key_not_found("k1").to_string(), "Signing key not found: k1");
        assert_eq!(
            AuthError::WrongTokenType { expected: TokenType::Refresh, actual: TokenType::Access }
                .to_string(),
            "Wrong token type: expected refresh, got access"
        );
    }

    #[test]
    fn test_error_from_jsonwebtoken() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        let err: AuthError = Error::from(ErrorKind::InvalidSignature).into();
        assert!(matches!(err, AuthError::SignatureInvalid));

        let err: AuthError = Error::from(ErrorKind::ExpiredSignature).into();
        assert!(matches!(err, AuthError::TokenExpired));

        let err: AuthError = Error::from(ErrorKind::InvalidToken).into();
        assert!(matches!(err, AuthError::MalformedToken { .. }));

        let err: AuthError = Error::from(ErrorKind::InvalidAlgorithm).into();
        assert!(matches!(err, AuthError::UnsupportedAlgorithm { .. }));
    }

    #[test]
    fn test_only_backend_errors_are_retryable() {
        assert!(AuthError::backend_unavailable("down").is_retryable());
        assert!(!AuthError::TokenRevoked.is_retryable());
        assert!(!AuthError::SignatureInvalid.is_retryable());
        assert!(!AuthError::key_not_found("k").is_retryable());
    }

    #[test]
    fn test_backend_error_preserves_source_chain() {
        use std::error::Error;

        let err = AuthError::backend_error("family marker", StorageError::timeout());
        let source = err.source().expect("source exists");
        assert_eq!(source.to_string(), "Operation timeout");
    }
}
