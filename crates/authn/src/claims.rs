//! Token claims and the principal derived from them.
//!
//! Tokens carry these claims:
//!
//! ```json
//! {
//!   "iss": "trustcore",
//!   "aud": "trustcore-api",
//!   "sub": "user-42",
//!   "jti": "Xy3...",
//!   "org_id": "acme",
//!   "iat": 1700000000,
//!   "exp": 1700000900,
//!   "token_type": "access",
//!   "family_id": "Qm9...",
//!   "scope": "docs:read docs:write",
//!   "role": "admin"
//! }
//! ```
//!
//! Access and refresh tokens minted together share a `family_id`, so revoking
//! a family covers both.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

/// Number of random bytes in token and family identifiers.
const ID_BYTES: usize = 16;

/// Kind of token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived bearer credential.
    Access,
    /// Long-lived credential exchanged for a new pair.
    Refresh,
}

impl TokenType {
    /// Wire name of the type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by every token this crate issues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Audience.
    pub aud: String,
    /// Subject (user id).
    pub sub: String,
    /// Unique token id.
    pub jti: String,
    /// Organization the subject acts for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Expiration (seconds since epoch).
    pub exp: i64,
    /// Access or refresh.
    pub token_type: TokenType,
    /// Refresh chain this token belongs to.
    pub family_id: String,
    /// Space-separated scopes.
    #[serde(default)]
    pub scope: String,
    /// Role name, when the subject has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl TokenClaims {
    /// Parse scopes from the space-separated `scope` claim.
    #[must_use]
    pub fn scopes(&self) -> Vec<String> {
        self.scope.split_whitespace().map(str::to_owned).collect()
    }

    /// `true` if the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }

    /// `iat` as a timestamp.
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    /// `exp` as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    /// The principal these claims authenticate.
    #[must_use]
    pub fn principal(&self) -> Principal {
        Principal {
            subject: self.sub.clone(),
            org_id: self.org_id.clone(),
            scopes: self.scopes(),
            role: self.role.clone(),
            token_id: self.jti.clone(),
        }
    }
}

/// Authenticated caller, as seen by downstream authorization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Principal {
    /// User id.
    pub subject: String,
    /// Organization, if the token was scoped to one.
    pub org_id: Option<String>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Role name, if any.
    pub role: Option<String>,
    /// `jti` of the token that authenticated the caller.
    pub token_id: String,
}

/// Outcome of a successful verification.
///
/// `degraded` is set when the revocation lookup could not reach the state
/// store. The token passed every other check; callers should log or alert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedToken {
    /// Verified claims.
    pub claims: TokenClaims,
    /// The revocation check was skipped or served from cache.
    pub degraded: bool,
}

impl VerifiedToken {
    /// The authenticated principal.
    #[must_use]
    pub fn principal(&self) -> Principal {
        self.claims.principal()
    }
}

/// Parameters for [`TokenService::issue_pair`](crate::TokenService::issue_pair).
///
/// # Examples
///
/// ```
/// use trustcore_authn::IssueRequest;
///
/// let request = IssueRequest::builder()
///     .subject("user-42")
///     .org_id("acme")
///     .scopes(vec!["docs:read".into()])
///     .role("member")
///     .build();
/// assert_eq!(request.subject, "user-42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct IssueRequest {
    /// User id.
    #[builder(into)]
    pub subject: String,
    /// Organization the tokens are scoped to.
    #[builder(into)]
    pub org_id: Option<String>,
    /// Scopes to grant.
    #[builder(default)]
    pub scopes: Vec<String>,
    /// Role name to embed.
    #[builder(into)]
    pub role: Option<String>,
}

/// An access token and the refresh token minted with it.
#[derive(Clone, Serialize)]
pub struct TokenPair {
    /// Signed access token.
    pub access_token: String,
    /// Signed refresh token.
    pub refresh_token: String,
    /// Access token expiry.
    pub access_expires_at: DateTime<Utc>,
    /// Refresh token expiry.
    pub refresh_expires_at: DateTime<Utc>,
    /// Refresh chain shared by both tokens.
    pub family_id: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("family_id", &self.family_id)
            .finish()
    }
}

/// Fresh random identifier, base64url without padding.
pub(crate) fn random_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
