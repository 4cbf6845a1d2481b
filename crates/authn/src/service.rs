//! Token lifecycle: issue, verify, rotate, revoke.
//!
//! # Verification order
//!
//! 1. Header decodes; algorithm is in the allow-list; `kid` is well formed
//! 2. `kid` names an active or rotating key ([`AuthError::KeyNotFound`])
//! 3. Signature verifies ([`AuthError::SignatureInvalid`])
//! 4. `iss` and `aud` match the configuration
//! 5. `exp` is in the future by the service clock ([`AuthError::TokenExpired`])
//! 6. No revocation record covers the `jti`, the subject, or the refresh family
//!    ([`AuthError::TokenRevoked`])
//!
//! Step 6 reads the shared [`ResilientStore`]. When the store cannot answer,
//! verification proceeds and the result is flagged
//! [`degraded`](VerifiedToken::degraded). A revocation record served from
//! the fallback cache still rejects the token.
//!
//! # Refresh families
//!
//! Every login starts a refresh family. The store key
//! `family:{family_id}:current` holds the `jti` of the only refresh token in
//! the family that may be exchanged. Rotation moves the marker with a
//! compare-and-set; presenting any other refresh token of the family revokes
//! the whole family.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use trustcore_storage::{ReadOutcome, ResilientStore, WriteOutcome};

use crate::{
    claims::{IssueRequest, TokenClaims, TokenPair, TokenType, VerifiedToken, random_id},
    clock::{Clock, SystemClock},
    config::TokenConfig,
    error::AuthError,
    jwks::Jwks,
    jwt::{decode_jwt_header, sign_claims, verify_signature},
    keyring::KeyRing,
    revocation::{
        RevocationAuditSink, RevocationOutcome, RevocationReason, RevocationRecord,
        RevocationTarget, TracingAuditSink, family_key, subject_key, token_key,
    },
    validation::{validate_algorithm, validate_kid},
};

/// Upper bound on one audit sink write.
const AUDIT_WRITE_TIMEOUT: Duration = Duration::from_millis(250);

/// Issues and checks tokens against a shared key ring and state store.
pub struct TokenService {
    store: ResilientStore,
    keys: Arc<KeyRing>,
    config: TokenConfig,
    clock: Arc<dyn Clock>,
    audit_sink: Arc<dyn RevocationAuditSink>,
}

#[bon::bon]
impl TokenService {
    /// Creates a service.
    ///
    /// `keys` is shared with the [`KeyRotator`](crate::KeyRotator) that
    /// maintains it.
    #[builder]
    pub fn new(
        store: ResilientStore,
        keys: Arc<KeyRing>,
        #[builder(default)] config: TokenConfig,
        #[builder(default = Arc::new(SystemClock))] clock: Arc<dyn Clock>,
        #[builder(default = Arc::new(TracingAuditSink))] audit_sink: Arc<dyn RevocationAuditSink>,
    ) -> Self {
        Self { store, keys, config, clock, audit_sink }
    }
}

impl TokenService {
    /// Issues an access token and a refresh token that starts a new family.
    ///
    /// # Errors
    ///
    /// - [`AuthError::NoActiveKey`] if the key ring has no active key
    /// - [`AuthError::BackendUnavailable`] if the family marker cannot be
    ///   written; without it the refresh token could never be rotated
    #[tracing::instrument(skip(self, request), fields(subject = %request.subject))]
    pub async fn issue_pair(&self, request: &IssueRequest) -> Result<TokenPair, AuthError> {
        let family_id = random_id();
        let (pair, refresh_jti) = self.mint_pair(
            &request.subject,
            request.org_id.clone(),
            &request.scopes.join(" "),
            request.role.clone(),
            family_id,
        )?;

        match self
            .store
            .compare_and_set(
                &family_marker_key(&pair.family_id),
                None,
                Bytes::from(refresh_jti),
                Some(self.config.refresh_ttl()),
            )
            .await
        {
            WriteOutcome::Applied => {
                tracing::debug!(family_id = %pair.family_id, "token pair issued");
                Ok(pair)
            },
            WriteOutcome::Conflict => {
                Err(AuthError::backend_unavailable("refresh family id collision"))
            },
            WriteOutcome::Rejected => {
                Err(AuthError::backend_unavailable("state store circuit open"))
            },
            WriteOutcome::Failed(err) => Err(AuthError::backend_error("write family marker", err)),
        }
    }

    /// Verifies a token of either type.
    ///
    /// # Errors
    ///
    /// Any of the typed errors listed in the module docs. Store degradation
    /// is never an error here.
    #[tracing::instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let header = decode_jwt_header(token)?;
        validate_algorithm(&format!("{:?}", header.alg))?;
        let kid = header.kid.ok_or_else(|| AuthError::malformed_token("JWT header missing 'kid'"))?;
        validate_kid(&kid)?;

        let key = self.keys.verifier(&kid).ok_or_else(|| AuthError::key_not_found(&kid))?;
        let claims = verify_signature(token, &key)?;

        if claims.iss != self.config.issuer() {
            return Err(AuthError::InvalidIssuer(format!(
                "expected '{}', got '{}'",
                self.config.issuer(),
                claims.iss
            )));
        }
        if claims.aud != self.config.audience() {
            return Err(AuthError::InvalidAudience(format!(
                "expected '{}', got '{}'",
                self.config.audience(),
                claims.aud
            )));
        }
        if claims.is_expired_at(self.clock.now()) {
            return Err(AuthError::TokenExpired);
        }

        let degraded = self.check_revocation(&claims).await?;
        if degraded {
            tracing::warn!(
                kid = %kid,
                token_type = %claims.token_type,
                "revocation check incomplete, state store degraded"
            );
        }
        Ok(VerifiedToken { claims, degraded })
    }

    /// Verifies a token and requires it to be an access token.
    ///
    /// # Errors
    ///
    /// As [`verify`](Self::verify), plus [`AuthError::WrongTokenType`] for a
    /// refresh token.
    pub async fn verify_access(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let verified = self.verify(token).await?;
        require_type(&verified.claims, TokenType::Access)?;
        Ok(verified)
    }

    /// Exchanges the current refresh token of a family for a new pair.
    ///
    /// Presenting a superseded refresh token revokes the whole family and
    /// fails with [`AuthError::TokenRevoked`]. Of two concurrent exchanges of
    /// the same token, at most one wins the compare-and-set; the other is
    /// treated as reuse.
    ///
    /// # Errors
    ///
    /// - Any verification error for `refresh_token`
    /// - [`AuthError::WrongTokenType`] for an access token
    /// - [`AuthError::TokenRevoked`] on reuse
    /// - [`AuthError::BackendUnavailable`] if the family marker cannot be
    ///   updated
    #[tracing::instrument(skip_all)]
    pub async fn rotate_refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let verified = self.verify(refresh_token).await?;
        let claims = verified.claims;
        require_type(&claims, TokenType::Refresh)?;

        let (pair, new_jti) = self.mint_pair(
            &claims.sub,
            claims.org_id.clone(),
            &claims.scope,
            claims.role.clone(),
            claims.family_id.clone(),
        )?;

        let outcome = self
            .store
            .compare_and_set(
                &family_marker_key(&claims.family_id),
                Some(claims.jti.as_bytes()),
                Bytes::from(new_jti),
                Some(self.config.refresh_ttl()),
            )
            .await;

        match outcome {
            WriteOutcome::Applied => {
                tracing::debug!(family_id = %claims.family_id, "refresh token rotated");
                Ok(pair)
            },
            WriteOutcome::Conflict => {
                tracing::warn!(
                    audit.action = "token.refresh",
                    audit.target = %claims.family_id,
                    audit.result = "reuse_detected",
                    subject = %claims.sub,
                    "superseded refresh token presented, revoking family"
                );
                let revoked = self
                    .revoke(
                        RevocationTarget::Family(claims.family_id.clone()),
                        RevocationReason::RefreshReuse,
                    )
                    .await;
                if !revoked.is_effective() {
                    tracing::error!(
                        family_id = %claims.family_id,
                        "family revocation after refresh reuse was not persisted"
                    );
                }
                Err(AuthError::TokenRevoked)
            },
            WriteOutcome::Rejected => {
                Err(AuthError::backend_unavailable("state store circuit open"))
            },
            WriteOutcome::Failed(err) => {
                Err(AuthError::backend_error("update family marker", err))
            },
        }
    }

    /// Writes a revocation record for `target`. Idempotent.
    ///
    /// Token and family records are written with insert-if-absent, so a
    /// repeat call reports [`RevocationOutcome::AlreadyRevoked`]. A subject
    /// record is overwritten, moving its cut-off to now.
    ///
    /// The audit sink is called for every new record; its failures are
    /// logged and otherwise ignored.
    #[tracing::instrument(skip(self, target), fields(revocation = %target))]
    pub async fn revoke(
        &self,
        target: RevocationTarget,
        reason: RevocationReason,
    ) -> RevocationOutcome {
        let record = RevocationRecord { target, reason, revoked_at: self.clock.now() };
        let value = match serde_json::to_vec(&record) {
            Ok(value) => Bytes::from(value),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode revocation record");
                return RevocationOutcome::NotPersisted;
            },
        };

        let key = record.target.storage_key();
        let ttl = Some(self.config.refresh_ttl());
        let write = match &record.target {
            RevocationTarget::Subject(_) => self.store.set(&key, value, ttl).await,
            RevocationTarget::Token(_) | RevocationTarget::Family(_) => {
                self.store.compare_and_set(&key, None, value, ttl).await
            },
        };

        let outcome = match write {
            WriteOutcome::Applied => RevocationOutcome::Recorded,
            WriteOutcome::Conflict => RevocationOutcome::AlreadyRevoked,
            WriteOutcome::Rejected | WriteOutcome::Failed(_) => RevocationOutcome::NotPersisted,
        };

        if outcome == RevocationOutcome::NotPersisted {
            tracing::warn!(
                audit.action = "token.revoke",
                audit.target = %record.target,
                audit.result = outcome.as_str(),
                "revocation not persisted, state store unavailable"
            );
        } else {
            tracing::info!(
                audit.action = "token.revoke",
                audit.target = %record.target,
                audit.reason = %record.reason,
                audit.result = outcome.as_str(),
                "token revocation"
            );
        }

        if outcome == RevocationOutcome::Recorded {
            self.append_audit(&record).await;
        }
        outcome
    }

    /// Revokes one token by `jti`.
    pub async fn revoke_token(&self, jti: &str, reason: RevocationReason) -> RevocationOutcome {
        self.revoke(RevocationTarget::Token(jti.to_owned()), reason).await
    }

    /// Revokes every token of `subject` issued up to now.
    ///
    /// `iat` has one-second resolution, so tokens issued later in the same
    /// second as the revocation are revoked too.
    pub async fn revoke_subject(
        &self,
        subject: &str,
        reason: RevocationReason,
    ) -> RevocationOutcome {
        self.revoke(RevocationTarget::Subject(subject.to_owned()), reason).await
    }

    /// Public keys of every non-retired signing key.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.keys.jwks()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Looks up revocation records for `claims`. Returns whether the lookup
    /// was degraded.
    async fn check_revocation(&self, claims: &TokenClaims) -> Result<bool, AuthError> {
        let by_jti_key = token_key(&claims.jti);
        let by_subject_key = subject_key(&claims.sub);
        let by_family_key = family_key(&claims.family_id);

        let (by_jti, by_subject, by_family) = tokio::join!(
            self.store.exists(&by_jti_key),
            self.store.get(&by_subject_key),
            self.store.exists(&by_family_key),
        );

        let subject_revoked = by_subject
            .value()
            .and_then(Option::as_ref)
            .is_some_and(|raw| subject_cutoff_covers(raw, claims.iat));
        let revoked = flag_set(&by_jti) || flag_set(&by_family) || subject_revoked;

        if revoked {
            tracing::info!(
                audit.action = "token.verify",
                audit.result = "revoked",
                token_type = %claims.token_type,
                "revoked token presented"
            );
            return Err(AuthError::TokenRevoked);
        }

        Ok(by_jti.is_degraded() || by_subject.is_degraded() || by_family.is_degraded())
    }

    fn mint_pair(
        &self,
        subject: &str,
        org_id: Option<String>,
        scope: &str,
        role: Option<String>,
        family_id: String,
    ) -> Result<(TokenPair, String), AuthError> {
        let (kid, key) = self.keys.signer()?;
        let now = self.clock.now();
        let access_exp = expiry(now, self.config.access_ttl())?;
        let refresh_exp = expiry(now, self.config.refresh_ttl())?;

        let base = TokenClaims {
            iss: self.config.issuer().to_owned(),
            aud: self.config.audience().to_owned(),
            sub: subject.to_owned(),
            jti: random_id(),
            org_id,
            iat: now.timestamp(),
            exp: access_exp.timestamp(),
            token_type: TokenType::Access,
            family_id,
            scope: scope.to_owned(),
            role,
        };
        let refresh = TokenClaims {
            jti: random_id(),
            exp: refresh_exp.timestamp(),
            token_type: TokenType::Refresh,
            ..base.clone()
        };

        let pair = TokenPair {
            access_token: sign_claims(&base, &kid, &key)?,
            refresh_token: sign_claims(&refresh, &kid, &key)?,
            access_expires_at: access_exp,
            refresh_expires_at: refresh_exp,
            family_id: refresh.family_id,
        };
        Ok((pair, refresh.jti))
    }

    async fn append_audit(&self, record: &RevocationRecord) {
        match tokio::time::timeout(AUDIT_WRITE_TIMEOUT, self.audit_sink.append(record)).await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                tracing::warn!(
                    error = %err,
                    revocation = %record.target,
                    "revocation audit write failed"
                );
            },
            Err(_) => {
                tracing::warn!(revocation = %record.target, "revocation audit write timed out");
            },
        }
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("store", &self.store)
            .field("keys", &self.keys)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn family_marker_key(family_id: &str) -> String {
    format!("family:{family_id}:current")
}

fn require_type(claims: &TokenClaims, expected: TokenType) -> Result<(), AuthError> {
    if claims.token_type == expected {
        Ok(())
    } else {
        Err(AuthError::WrongTokenType { expected, actual: claims.token_type })
    }
}

fn flag_set(outcome: &ReadOutcome<bool>) -> bool {
    outcome.value().copied().unwrap_or(false)
}

/// `true` if a subject revocation record covers a token issued at `iat`.
/// The cut-off is truncated to whole seconds to match `iat`, so the whole
/// revocation second is covered. An unreadable record revokes.
fn subject_cutoff_covers(raw: &Bytes, iat: i64) -> bool {
    match serde_json::from_slice::<RevocationRecord>(raw) {
        Ok(record) => iat <= record.revoked_at.timestamp(),
        Err(err) => {
            tracing::warn!(error = %err, "unreadable subject revocation record, treating as revoked");
            true
        },
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AuthError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| AuthError::Signing(format!("token lifetime {ttl:?} out of range")))
}
