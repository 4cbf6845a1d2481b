//! Source of truth for permission grants.
//!
//! Grants are written by administrative tooling elsewhere; the engine only
//! loads them, at startup and then periodically.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use trustcore_storage::StorageResult;

use crate::grant::PermissionGrant;

/// Read access to the grant definitions.
#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Loads every grant.
    async fn load(&self) -> StorageResult<Vec<PermissionGrant>>;
}

/// In-process [`GrantRepository`] for configuration-defined grants and
/// tests. [`replace`](Self::replace) stands in for an administrative edit.
#[derive(Debug, Clone, Default)]
pub struct MemoryGrantRepository {
    grants: Arc<RwLock<Vec<PermissionGrant>>>,
}

impl MemoryGrantRepository {
    /// Creates a repository holding `grants`.
    #[must_use]
    pub fn new(grants: Vec<PermissionGrant>) -> Self {
        Self { grants: Arc::new(RwLock::new(grants)) }
    }

    /// Replaces every grant.
    pub fn replace(&self, grants: Vec<PermissionGrant>) {
        *self.grants.write() = grants;
    }
}

#[async_trait]
impl GrantRepository for MemoryGrantRepository {
    async fn load(&self) -> StorageResult<Vec<PermissionGrant>> {
        Ok(self.grants.read().clone())
    }
}
