//! Configuration for [`PermissionEngine`](crate::PermissionEngine).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trustcore_storage::ConfigError;

/// Default lifetime of a cached decision.
pub const DEFAULT_DECISION_TTL: Duration = Duration::from_secs(5 * 60);
/// Default interval between grant reloads.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Decision caching and grant refresh settings.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trustcore_authz::PermissionConfig;
///
/// let config = PermissionConfig::builder()
///     .decision_ttl(Duration::from_secs(60))
///     .build()
///     .expect("valid config");
/// assert_eq!(config.decision_ttl(), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    #[serde(with = "humantime_serde")]
    decision_ttl: Duration,
    #[serde(with = "humantime_serde")]
    refresh_interval: Duration,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self { decision_ttl: DEFAULT_DECISION_TTL, refresh_interval: DEFAULT_REFRESH_INTERVAL }
    }
}

#[bon::bon]
impl PermissionConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MustBePositive`] if either duration is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_DECISION_TTL)] decision_ttl: Duration,
        #[builder(default = DEFAULT_REFRESH_INTERVAL)] refresh_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { decision_ttl, refresh_interval };
        config.validate()?;
        Ok(config)
    }

    /// Checks every invariant. Use after deserializing.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decision_ttl.is_zero() {
            return Err(ConfigError::MustBePositive { field: "decision_ttl", value: "0s".into() });
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "refresh_interval",
                value: "0s".into(),
            });
        }
        Ok(())
    }

    /// How long a cached decision stays valid.
    #[must_use]
    pub fn decision_ttl(&self) -> Duration {
        self.decision_ttl
    }

    /// Interval between background grant reloads.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PermissionConfig::builder().build().unwrap();
        assert_eq!(config, PermissionConfig::default());
        assert_eq!(config.decision_ttl(), Duration::from_secs(300));
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let err = PermissionConfig::builder().decision_ttl(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::MustBePositive { field: "decision_ttl", .. }));

        let err = PermissionConfig::builder().refresh_interval(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::MustBePositive { field: "refresh_interval", .. }));
    }

    #[test]
    fn deserializes_humantime() {
        let config: PermissionConfig =
            serde_json::from_str(r#"{"decision_ttl": "2m", "refresh_interval": "30s"}"#).unwrap();
        assert_eq!(config.decision_ttl(), Duration::from_secs(120));
        assert_eq!(config.refresh_interval(), Duration::from_secs(30));

        let partial: PermissionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(partial, PermissionConfig::default());
    }
}
