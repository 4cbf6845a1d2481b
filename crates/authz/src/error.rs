//! Authorization error types.
//!
//! A denied request is a [`Decision::Deny`](crate::Decision::Deny), never an
//! error. Errors mean no decision could be made at all.

use thiserror::Error;
use trustcore_storage::StorageError;

/// Errors produced while loading grants or evaluating a check.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// A role, resource, or action pattern (or a checked value) has invalid
    /// syntax.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending input.
        pattern: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A grant condition cannot be parsed.
    #[error("Invalid condition '{condition}': {reason}")]
    InvalidCondition {
        /// The offending expression.
        condition: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A role name outside the fixed hierarchy.
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// No grant set has ever been loaded, so no decision can be made.
    #[error("Grant source unavailable: {message}")]
    GrantSourceUnavailable {
        /// Description of the failure.
        message: String,
        /// The underlying storage error, if any.
        #[source]
        source: Option<StorageError>,
    },
}

impl AuthzError {
    /// Creates an [`AuthzError::InvalidPattern`].
    #[must_use]
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern { pattern: pattern.into(), reason: reason.into() }
    }

    /// Creates an [`AuthzError::InvalidCondition`].
    #[must_use]
    pub fn invalid_condition(condition: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCondition { condition: condition.into(), reason: reason.into() }
    }

    /// Creates an [`AuthzError::GrantSourceUnavailable`] wrapping a storage
    /// error.
    #[must_use]
    pub fn grant_source(message: impl Into<String>, source: Option<StorageError>) -> Self {
        Self::GrantSourceUnavailable { message: message.into(), source }
    }
}

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;
