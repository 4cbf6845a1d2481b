//! Configuration for [`ResilientStore`](crate::ResilientStore).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    circuit_breaker::CircuitBreakerConfig, error::ConfigError, fallback::DEFAULT_FALLBACK_CAPACITY,
};

/// Default deadline for a single backend call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(200);

/// Resilience settings for the shared store.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trustcore_storage::ResilientStoreConfig;
///
/// let config = ResilientStoreConfig::builder()
///     .call_timeout(Duration::from_millis(100))
///     .fallback_capacity(500)
///     .build()
///     .expect("valid config");
/// assert_eq!(config.fallback_capacity(), 500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilientStoreConfig {
    #[serde(flatten)]
    breaker: CircuitBreakerConfig,
    #[serde(with = "humantime_serde")]
    call_timeout: Duration,
    fallback_capacity: u64,
}

impl Default for ResilientStoreConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            fallback_capacity: DEFAULT_FALLBACK_CAPACITY,
        }
    }
}

#[bon::bon]
impl ResilientStoreConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `call_timeout` or `fallback_capacity` is
    /// zero, or if the breaker settings are invalid.
    #[builder]
    pub fn new(
        #[builder(default)] breaker: CircuitBreakerConfig,
        #[builder(default = DEFAULT_CALL_TIMEOUT)] call_timeout: Duration,
        #[builder(default = DEFAULT_FALLBACK_CAPACITY)] fallback_capacity: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self { breaker, call_timeout, fallback_capacity };
        config.validate()?;
        Ok(config)
    }

    /// Checks every invariant. Use after deserializing.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker.validate()?;
        if self.call_timeout.is_zero() {
            return Err(ConfigError::MustBePositive { field: "call_timeout", value: "0s".into() });
        }
        if self.fallback_capacity == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "fallback_capacity",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    /// Circuit breaker settings.
    #[must_use]
    pub fn breaker(&self) -> CircuitBreakerConfig {
        self.breaker
    }

    /// Deadline applied to each backend call.
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Maximum number of fallback cache entries.
    #[must_use]
    pub fn fallback_capacity(&self) -> u64 {
        self.fallback_capacity
    }
}
