//! Token lifetimes, claim expectations, and key rotation schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trustcore_storage::ConfigError;

/// Default access token lifetime.
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(15 * 60);
/// Default refresh token lifetime.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);
/// Default time a demoted key keeps verifying.
pub const DEFAULT_KEY_GRACE_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
/// Default interval between automatic key rotations.
pub const DEFAULT_KEY_ROTATION_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Default `iss` claim.
pub const DEFAULT_ISSUER: &str = "trustcore";
/// Default `aud` claim.
pub const DEFAULT_AUDIENCE: &str = "trustcore-api";

/// Configuration for [`TokenService`](crate::TokenService) and
/// [`KeyRotator`](crate::KeyRotator).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use trustcore_authn::TokenConfig;
///
/// let config = TokenConfig::builder()
///     .access_ttl(Duration::from_secs(300))
///     .issuer("auth.example.com")
///     .build()
///     .expect("valid config");
/// assert_eq!(config.access_ttl(), Duration::from_secs(300));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    issuer: String,
    audience: String,
    #[serde(with = "humantime_serde")]
    access_ttl: Duration,
    #[serde(with = "humantime_serde")]
    refresh_ttl: Duration,
    #[serde(with = "humantime_serde")]
    key_grace_period: Duration,
    #[serde(with = "humantime_serde")]
    key_rotation_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_owned(),
            audience: DEFAULT_AUDIENCE.to_owned(),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
            key_grace_period: DEFAULT_KEY_GRACE_PERIOD,
            key_rotation_interval: DEFAULT_KEY_ROTATION_INTERVAL,
        }
    }
}

#[bon::bon]
impl TokenConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a duration is zero, the refresh TTL is
    /// shorter than the access TTL, or the issuer or audience is empty.
    #[builder]
    pub fn new(
        #[builder(into, default = DEFAULT_ISSUER.to_owned())] issuer: String,
        #[builder(into, default = DEFAULT_AUDIENCE.to_owned())] audience: String,
        #[builder(default = DEFAULT_ACCESS_TTL)] access_ttl: Duration,
        #[builder(default = DEFAULT_REFRESH_TTL)] refresh_ttl: Duration,
        #[builder(default = DEFAULT_KEY_GRACE_PERIOD)] key_grace_period: Duration,
        #[builder(default = DEFAULT_KEY_ROTATION_INTERVAL)] key_rotation_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            issuer,
            audience,
            access_ttl,
            refresh_ttl,
            key_grace_period,
            key_rotation_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks every invariant. Use after deserializing.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("issuer", &self.issuer), ("audience", &self.audience)] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid { field, reason: "must not be empty".into() });
            }
        }
        for (field, value) in [
            ("access_ttl", self.access_ttl),
            ("refresh_ttl", self.refresh_ttl),
            ("key_grace_period", self.key_grace_period),
            ("key_rotation_interval", self.key_rotation_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::MustBePositive { field, value: "0s".into() });
            }
        }
        if self.refresh_ttl < self.access_ttl {
            return Err(ConfigError::BelowMinimum {
                field: "refresh_ttl",
                min: format!("{:?}", self.access_ttl),
                value: format!("{:?}", self.refresh_ttl),
            });
        }
        Ok(())
    }

    /// Expected `iss` claim.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expected `aud` claim.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Access token lifetime.
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Refresh token lifetime. Revocation records and family markers live
    /// this long.
    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// How long a demoted key keeps verifying.
    #[must_use]
    pub fn key_grace_period(&self) -> Duration {
        self.key_grace_period
    }

    /// Interval between automatic rotations.
    #[must_use]
    pub fn key_rotation_interval(&self) -> Duration {
        self.key_rotation_interval
    }
}
