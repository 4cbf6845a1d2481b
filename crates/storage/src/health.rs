//! Health reported by [`ResilientStore::health`](crate::ResilientStore::health).
//!
//! The status follows the circuit breaker:
//!
//! | Circuit | Status | Serving |
//! |---------|--------|---------|
//! | closed | `Healthy` | yes |
//! | half-open | `Degraded` | yes, probes in flight |
//! | open, or store closed | `Unhealthy` | no |

use std::{collections::HashMap, fmt, time::Duration};

/// Store health with the metadata gathered while computing it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trustcore_storage::health::{HealthMetadata, HealthStatus};
///
/// let status = HealthStatus::degraded(
///     HealthMetadata::new(Duration::from_millis(1), "memory"),
///     "circuit half-open",
/// );
/// assert!(status.is_serving());
/// assert_eq!(status.label(), "degraded");
/// ```
#[derive(Debug, Clone)]
pub enum HealthStatus {
    /// Circuit closed.
    Healthy(HealthMetadata),
    /// Serving with reduced confidence, with the reason.
    Degraded(HealthMetadata, String),
    /// Not serving, with the reason.
    Unhealthy(HealthMetadata, String),
}

impl HealthStatus {
    /// A `Healthy` status.
    #[must_use]
    pub fn healthy(metadata: HealthMetadata) -> Self {
        Self::Healthy(metadata)
    }

    /// A `Degraded` status.
    #[must_use]
    pub fn degraded(metadata: HealthMetadata, reason: impl Into<String>) -> Self {
        Self::Degraded(metadata, reason.into())
    }

    /// An `Unhealthy` status.
    #[must_use]
    pub fn unhealthy(metadata: HealthMetadata, reason: impl Into<String>) -> Self {
        Self::Unhealthy(metadata, reason.into())
    }

    /// `true` for `Healthy`.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy(_))
    }

    /// `true` for `Degraded`.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(..))
    }

    /// `true` for `Unhealthy`.
    #[must_use]
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(..))
    }

    /// `true` unless unhealthy. A degraded store still answers, possibly
    /// from its fallback cache.
    #[must_use]
    pub fn is_serving(&self) -> bool {
        !self.is_unhealthy()
    }

    /// Metadata of any variant.
    #[must_use]
    pub fn metadata(&self) -> &HealthMetadata {
        match self {
            Self::Healthy(m) | Self::Degraded(m, _) | Self::Unhealthy(m, _) => m,
        }
    }

    /// Why the store is not healthy.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Healthy(_) => None,
            Self::Degraded(_, reason) | Self::Unhealthy(_, reason) => Some(reason),
        }
    }

    /// `healthy`, `degraded`, or `unhealthy`.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy(_) => "healthy",
            Self::Degraded(..) => "degraded",
            Self::Unhealthy(..) => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())?;
        if let Some(reason) = self.reason() {
            write!(f, ": {reason}")?;
        }
        write!(f, " ({}ms)", self.metadata().check_duration.as_millis())
    }
}

/// What the health check saw.
#[derive(Debug, Clone)]
pub struct HealthMetadata {
    /// Time spent computing the status.
    pub check_duration: Duration,
    /// Backend name given to the store.
    pub backend: String,
    /// Free-form details. The resilient store reports `circuit_state`,
    /// `consecutive_failures` and `fallback_entries`.
    pub details: HashMap<String, String>,
}

impl HealthMetadata {
    /// Metadata with no details.
    #[must_use]
    pub fn new(check_duration: Duration, backend: impl Into<String>) -> Self {
        Self { check_duration, backend: backend.into(), details: HashMap::new() }
    }

    /// Adds a detail.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}
