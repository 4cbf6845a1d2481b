//! # Trust Core Authorization
//!
//! Role-based permission checks for the trust core.
//!
//! This crate provides:
//! - **[`Role`]**: the fixed hierarchy `super_admin > owner > admin > member > viewer`
//! - **[`Pattern`]**: segment-wise wildcard matching (`org:*`)
//! - **[`Condition`]**: attribute predicates such as `resource.orgId == principal.orgId`
//! - **[`PermissionEngine`]**: allow/deny decisions with a shared decision cache
//!
//! A role holds every grant of every lower-ranked role, so the effective
//! grant set of a role is always a superset of those below it. Deny is the
//! default; there are no explicit deny rules.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use trustcore_authz::{
//!     MemoryGrantRepository, PermissionEngine, PermissionGrant, Principal, Resource, Role,
//! };
//! use trustcore_storage::{MemoryBackend, ResilientStore, ResilientStoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ResilientStore::new(
//!     Arc::new(MemoryBackend::new()),
//!     "memory",
//!     ResilientStoreConfig::default(),
//! );
//! let grants = vec![PermissionGrant::new("admin", "org:*", "org:*")?];
//! let engine = PermissionEngine::builder()
//!     .store(store)
//!     .repository(Arc::new(MemoryGrantRepository::new(grants)))
//!     .build();
//! engine.refresh_grants().await?;
//!
//! let owner = Principal::builder().subject("user-42").role(Role::Owner).build();
//! let decision = engine.check(&owner, &Resource::new("org:acme"), "org:write").await?;
//! assert!(decision.is_allowed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: [`testutil::FlakyGrantRepository`], [`testutil::EngineHarness`], and a
//!   sample grant table.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Grant conditions.
pub mod condition;
/// Engine configuration.
pub mod config;
/// Permission checks and decision caching.
pub mod engine;
/// Authorization error types.
pub mod error;
/// Grants and resolved grant sets.
pub mod grant;
/// Wildcard patterns.
pub mod pattern;
/// Principals and resources.
pub mod principal;
/// Grant persistence.
pub mod repository;
/// The role hierarchy.
pub mod role;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use condition::Condition;
pub use config::PermissionConfig;
pub use engine::{Decision, PermissionEngine};
pub use error::{AuthzError, Result};
pub use grant::{GrantSet, PermissionGrant};
pub use pattern::{Pattern, validate_value};
pub use principal::{Principal, Resource};
pub use repository::{GrantRepository, MemoryGrantRepository};
pub use role::Role;
