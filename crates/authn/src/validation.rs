//! Token header validation.
//!
//! These checks run before any key lookup, so a hostile header never reaches
//! the key ring or the signature code.

use crate::error::AuthError;

/// Algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric; a public key would become the secret
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms accepted for verification. Keys are Ed25519 only.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Longest `kid` accepted in a token header.
pub const MAX_KID_LENGTH: usize = 128;

/// Validate a header algorithm against the allow-list (RFC 8725 §3.1).
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is forbidden
/// or not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use trustcore_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("RS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::unsupported_algorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only EdDSA is supported)"
        )));
    }

    Ok(())
}

/// Validate the shape of a `kid` header value.
///
/// Accepts 1 to [`MAX_KID_LENGTH`] characters from `[A-Za-z0-9._-]`.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] otherwise.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::malformed_token("kid is empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::malformed_token(format!(
            "kid exceeds {MAX_KID_LENGTH} characters"
        )));
    }
    if !kid.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(AuthError::malformed_token("kid contains invalid characters"));
    }
    Ok(())
}
