//! Persistence seam for signing key material.
//!
//! The key ring is rebuilt from the repository at startup, and every
//! rotation writes the new set back before installing it.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use trustcore_storage::StorageResult;

use crate::keys::KeyEntry;

/// Durable store for the signing key set.
#[async_trait]
pub trait SigningKeyRepository: Send + Sync {
    /// Loads the persisted key set. An empty vector means none exists yet.
    async fn load(&self) -> StorageResult<Vec<KeyEntry>>;

    /// Replaces the persisted key set.
    async fn save(&self, entries: &[KeyEntry]) -> StorageResult<()>;
}

/// In-process [`SigningKeyRepository`] for development and tests.
///
/// Keys do not survive a restart.
#[derive(Debug, Clone, Default)]
pub struct MemorySigningKeyRepository {
    entries: Arc<RwLock<Vec<KeyEntry>>>,
}

impl MemorySigningKeyRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// `true` if nothing is persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl SigningKeyRepository for MemorySigningKeyRepository {
    async fn load(&self) -> StorageResult<Vec<KeyEntry>> {
        Ok(self.entries.read().clone())
    }

    async fn save(&self, entries: &[KeyEntry]) -> StorageResult<()> {
        *self.entries.write() = entries.to_vec();
        Ok(())
    }
}
