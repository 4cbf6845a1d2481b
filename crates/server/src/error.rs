//! Startup errors.

use trustcore_authn::AuthError;
use trustcore_storage::ConfigError;

/// Why [`TrustCore::init`](crate::TrustCore::init) failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InitError {
    /// A configuration section is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The signing key set could not be loaded or created.
    #[error("signing keys unavailable: {0}")]
    Keys(#[from] AuthError),
}
