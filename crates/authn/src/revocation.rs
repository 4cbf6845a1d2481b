//! Revocation records and the audit seam.
//!
//! Records are stored under one key per target and expire with the longest
//! token lifetime, after which no token they could cover is still valid.
//!
//! | Target | Key |
//! |---|---|
//! | token | `revoked:jti:{jti}` |
//! | subject | `revoked:sub:{subject}` |
//! | refresh family | `revoked:family:{family_id}` |

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trustcore_storage::StorageResult;

/// What a revocation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum RevocationTarget {
    /// A single token, by `jti`.
    Token(String),
    /// Every token of a subject issued at or before the revocation.
    Subject(String),
    /// Every token of a refresh chain, past and future.
    Family(String),
}

impl RevocationTarget {
    /// State store key holding the record for this target.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::Token(jti) => token_key(jti),
            Self::Subject(subject) => subject_key(subject),
            Self::Family(family_id) => family_key(family_id),
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token(_) => "token",
            Self::Subject(_) => "subject",
            Self::Family(_) => "family",
        }
    }
}

impl fmt::Display for RevocationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(id) | Self::Subject(id) | Self::Family(id) => {
                write!(f, "{}:{id}", self.kind())
            },
        }
    }
}

/// Why a revocation happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// The user logged out.
    Logout,
    /// A superseded refresh token was presented again.
    RefreshReuse,
    /// Credentials are believed compromised.
    Compromised,
    /// An administrator revoked access.
    Administrative,
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Logout => "logout",
            Self::RefreshReuse => "refresh_reuse",
            Self::Compromised => "compromised",
            Self::Administrative => "administrative",
        })
    }
}

/// An append-only revocation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// What was revoked.
    pub target: RevocationTarget,
    /// Why.
    pub reason: RevocationReason,
    /// When.
    pub revoked_at: DateTime<Utc>,
}

/// Result of a revocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a revocation may not have been persisted; check the outcome"]
pub enum RevocationOutcome {
    /// A new record was written.
    Recorded,
    /// A record for this target already existed.
    AlreadyRevoked,
    /// The state store was unavailable; nothing was written.
    NotPersisted,
}

impl RevocationOutcome {
    /// `true` if the target is revoked after the call.
    #[must_use]
    pub fn is_effective(self) -> bool {
        matches!(self, Self::Recorded | Self::AlreadyRevoked)
    }

    /// Label for audit fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recorded => "recorded",
            Self::AlreadyRevoked => "already_revoked",
            Self::NotPersisted => "not_persisted",
        }
    }
}

/// Append-only log of revocation records.
///
/// Writes are best-effort: the service logs a failure and carries on.
#[async_trait]
pub trait RevocationAuditSink: Send + Sync {
    /// Appends `record` to the audit log.
    async fn append(&self, record: &RevocationRecord) -> StorageResult<()>;
}

/// [`RevocationAuditSink`] that emits each record as a `tracing` audit event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl RevocationAuditSink for TracingAuditSink {
    async fn append(&self, record: &RevocationRecord) -> StorageResult<()> {
        tracing::info!(
            audit.action = "token.revoke",
            audit.target = %record.target,
            audit.reason = %record.reason,
            audit.revoked_at = %record.revoked_at,
            "revocation recorded"
        );
        Ok(())
    }
}

pub(crate) fn token_key(jti: &str) -> String {
    format!("revoked:jti:{jti}")
}

pub(crate) fn subject_key(subject: &str) -> String {
    format!("revoked:sub:{subject}")
}

pub(crate) fn family_key(family_id: &str) -> String {
    format!("revoked:family:{family_id}")
}
