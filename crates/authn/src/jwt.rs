//! Compact JWT encoding and signature checks.
//!
//! These functions know nothing about key status, expiry policy, or
//! revocation; [`TokenService`](crate::TokenService) layers those on top.

use std::collections::HashSet;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header};

use crate::{claims::TokenClaims, error::AuthError};

/// Scheme prefix of an `Authorization` header.
const BEARER_PREFIX: &str = "Bearer ";

/// Decode the JWT header without verification.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the header cannot be decoded,
/// including headers naming an algorithm the JWT library does not know
/// (such as `none`).
pub fn decode_jwt_header(token: &str) -> Result<Header, AuthError> {
    decode_header(token)
        .map_err(|e| AuthError::malformed_token(format!("Failed to decode JWT header: {e}")))
}

/// Sign `claims` with an Ed25519 key, setting `kid` in the header.
///
/// # Errors
///
/// Returns [`AuthError::Signing`] if encoding fails.
pub fn sign_claims(
    claims: &TokenClaims,
    kid: &str,
    key: &EncodingKey,
) -> Result<String, AuthError> {
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(kid.to_owned());
    jsonwebtoken::encode(&header, claims, key).map_err(|e| AuthError::Signing(e.to_string()))
}

/// Verify the signature of `token` and decode its claims.
///
/// Time-based and audience checks are disabled here; the caller checks
/// `exp` against its own clock and `iss`/`aud` against its configuration.
///
/// # Errors
///
/// Returns [`AuthError::SignatureInvalid`] on a bad signature and
/// [`AuthError::MalformedToken`] if the payload does not hold the expected
/// claims.
pub fn verify_signature(token: &str, key: &DecodingKey) -> Result<TokenClaims, AuthError> {
    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    let token_data = decode::<TokenClaims>(token, key, &validation)?;
    Ok(token_data.claims)
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the scheme is not `Bearer` or
/// the token is empty.
///
/// # Examples
///
/// ```
/// use trustcore_authn::jwt::extract_bearer;
///
/// assert_eq!(extract_bearer("Bearer abc.def.ghi").unwrap(), "abc.def.ghi");
/// assert!(extract_bearer("Basic dXNlcjpwYXNz").is_err());
/// ```
pub fn extract_bearer(header_value: &str) -> Result<&str, AuthError> {
    let header_value = header_value.trim();
    let token = header_value
        .get(..BEARER_PREFIX.len())
        .filter(|scheme| scheme.eq_ignore_ascii_case(BEARER_PREFIX))
        .map(|_| header_value[BEARER_PREFIX.len()..].trim())
        .ok_or_else(|| AuthError::malformed_token("Authorization scheme must be Bearer"))?;
    if token.is_empty() {
        return Err(AuthError::malformed_token("Bearer token is empty"));
    }
    Ok(token)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use chrono::Utc;
    use rstest::rstest;

    use super::*;
    use crate::{claims::TokenType, keys::SigningKeyPair};

    fn claims() -> TokenClaims {
        let now = Utc::now().timestamp();
        TokenClaims {
            iss: "trustcore".into(),
            aud: "trustcore-api".into(),
            sub: "user-1".into(),
            jti: "jti-1".into(),
            org_id: None,
            iat: now,
            exp: now + 60,
            token_type: TokenType::Access,
            family_id: "fam-1".into(),
            scope: String::new(),
            role: None,
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let key = SigningKeyPair::generate(Utc::now());
        let original = claims();
        let token = sign_claims(&original, key.kid(), &key.encoding_key()).unwrap();

        let header = decode_jwt_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::EdDSA);
        assert_eq!(header.kid.as_deref(), Some(key.kid()));

        let decoded = verify_signature(&token, &key.decoding_key().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_wrong_key_is_signature_invalid() {
        let signer = SigningKeyPair::generate(Utc::now());
        let other = SigningKeyPair::generate(Utc::now());
        let token = sign_claims(&claims(), signer.kid(), &signer.encoding_key()).unwrap();

        let result = verify_signature(&token, &other.decoding_key().unwrap());
        assert!(matches!(result, Err(AuthError::SignatureInvalid)));
    }

    #[test]
    fn test_expired_claims_still_decode() {
        let key = SigningKeyPair::generate(Utc::now());
        let mut expired = claims();
        expired.exp = expired.iat - 3600;
        let token = sign_claims(&expired, key.kid(), &key.encoding_key()).unwrap();

        assert!(verify_signature(&token, &key.decoding_key().unwrap()).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("not-a-jwt")]
    #[case("a.b")]
    #[case("!!!.???.***")]
    fn test_garbage_header_is_malformed(#[case] token: &str) {
        assert!(matches!(decode_jwt_header(token), Err(AuthError::MalformedToken { .. })));
    }

    #[rstest]
    #[case("Bearer abc", "abc")]
    #[case("bearer abc", "abc")]
    #[case("  Bearer   abc  ", "abc")]
    fn test_extract_bearer(#[case] header: &str, #[case] expected: &str) {
        assert_eq!(extract_bearer(header).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("Bearer")]
    #[case("Bearer   ")]
    #[case("Token abc")]
    fn test_extract_bearer_rejects(#[case] header: &str) {
        assert!(matches!(extract_bearer(header), Err(AuthError::MalformedToken { .. })));
    }
}
