//! Server configuration.
//!
//! Read from the YAML file named by `TRUSTCORE_CONFIG` when set, then
//! overlaid with `TRUSTCORE_BIND`. Every section is optional and falls back
//! to its component defaults.
//!
//! ```yaml
//! bind_addr: "0.0.0.0:8080"
//! store:
//!   failure_threshold: 5
//!   cooldown: 60s
//!   call_timeout: 200ms
//! tokens:
//!   issuer: trustcore
//!   access_ttl: 15m
//!   refresh_ttl: 30d
//! permissions:
//!   decision_ttl: 5m
//! grants:
//!   - role: admin
//!     resource: "org:*"
//!     action: "org:*"
//! ```

use std::{fs, net::SocketAddr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use trustcore_authn::TokenConfig;
use trustcore_authz::{PermissionConfig, PermissionGrant};
use trustcore_storage::{ConfigError, ResilientStoreConfig};

/// Environment variable naming the YAML config file.
pub const CONFIG_PATH_ENV: &str = "TRUSTCORE_CONFIG";
/// Environment variable overriding the listen address.
pub const BIND_ENV: &str = "TRUSTCORE_BIND";
/// Listen address when none is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Settings for every component the server wires together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub bind_addr: SocketAddr,
    /// Shared state store resilience.
    pub store: ResilientStoreConfig,
    /// Token lifetimes, issuer, and key rotation.
    pub tokens: TokenConfig,
    /// Decision caching and grant refresh.
    pub permissions: PermissionConfig,
    /// Static grant table served to the permission engine.
    pub grants: Vec<PermissionGrant>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            store: ResilientStoreConfig::default(),
            tokens: TokenConfig::default(),
            permissions: PermissionConfig::default(),
            grants: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Fails if the config file cannot be read or parsed, the bind override
    /// is not a socket address, or a section is invalid.
    pub fn from_env_or_yaml() -> Result<Self> {
        let yaml = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Some(
                fs::read_to_string(&path)
                    .with_context(|| format!("read {CONFIG_PATH_ENV}: {path}"))?,
            ),
            Err(_) => None,
        };
        let bind = std::env::var(BIND_ENV).ok();
        Self::from_sources(yaml.as_deref(), bind.as_deref())
    }

    /// Builds configuration from an optional YAML document and an optional
    /// bind address override.
    ///
    /// # Errors
    ///
    /// Same as [`from_env_or_yaml`](Self::from_env_or_yaml).
    pub fn from_sources(yaml: Option<&str>, bind: Option<&str>) -> Result<Self> {
        let mut config = match yaml {
            Some(contents) => {
                serde_yaml::from_str(contents).context("parse trust core config yaml")?
            },
            None => Self::default(),
        };
        if let Some(value) = bind {
            config.bind_addr = value.parse().with_context(|| format!("parse {BIND_ENV}"))?;
        }
        config.validate().context("invalid trust core config")?;
        Ok(config)
    }

    /// Checks every section. Deserialization skips the builders, so this is
    /// the only validation a file-loaded config gets.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.tokens.validate()?;
        self.permissions.validate()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_without_sources() {
        let config = ServerConfig::from_sources(None, None).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.bind_addr.to_string(), DEFAULT_BIND_ADDR);
    }

    #[test]
    fn yaml_sections_are_applied() {
        let yaml = r#"
bind_addr: "127.0.0.1:9000"
store:
  failure_threshold: 3
  call_timeout: 100ms
tokens:
  issuer: auth.example.com
  access_ttl: 5m
permissions:
  decision_ttl: 1m
grants:
  - role: admin
    resource: "org:*"
    action: "org:*"
  - role: member
    resource: "document:*"
    action: "document:write"
    condition: "resource.orgId == principal.orgId"
"#;
        let config = ServerConfig::from_sources(Some(yaml), None).unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.store.breaker().failure_threshold(), 3);
        assert_eq!(config.store.call_timeout(), Duration::from_millis(100));
        assert_eq!(config.tokens.issuer(), "auth.example.com");
        assert_eq!(config.tokens.access_ttl(), Duration::from_secs(300));
        assert_eq!(config.tokens.refresh_ttl(), TokenConfig::default().refresh_ttl());
        assert_eq!(config.permissions.decision_ttl(), Duration::from_secs(60));
        assert_eq!(config.grants.len(), 2);
        assert!(config.grants[1].is_conditional());
    }

    #[test]
    fn bind_override_wins() {
        let config =
            ServerConfig::from_sources(Some("bind_addr: \"127.0.0.1:9000\""), Some("127.0.0.1:7000"))
                .unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:7000");
    }

    #[test]
    fn invalid_sources_are_rejected() {
        assert!(ServerConfig::from_sources(None, Some("not an address")).is_err());
        assert!(ServerConfig::from_sources(Some("store: [1, 2"), None).is_err());
        assert!(ServerConfig::from_sources(Some("tokens:\n  access_ttl: 0s"), None).is_err());
        assert!(
            ServerConfig::from_sources(
                Some("grants:\n  - role: admin\n    resource: \"org:**\"\n    action: read"),
                None
            )
            .is_err()
        );
    }
}
