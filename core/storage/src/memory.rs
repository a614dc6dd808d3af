//! In-memory blob store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::provider::{BlobMetadata, BlobStore};
use lockbox_common::{Error, Result, StoragePath};

/// In-memory blob store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    storage: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn path_to_key(path: &StoragePath) -> String {
        path.to_string_path()
    }

    fn poisoned() -> Error {
        Error::Storage("Memory store lock poisoned".to_string())
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.storage.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite stored bytes in place, bypassing the write path.
    ///
    /// Lets tests simulate corruption of data at rest.
    pub fn tamper(&self, path: &StoragePath, f: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        let mut storage = self.storage.write().map_err(|_| Self::poisoned())?;
        let entry = storage
            .get_mut(&Self::path_to_key(path))
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))?;
        f(entry);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, path: &StoragePath, data: Vec<u8>) -> Result<BlobMetadata> {
        if path.is_root() {
            return Err(Error::InvalidInput("Blob path cannot be the root".to_string()));
        }

        let metadata = BlobMetadata {
            path: path.clone(),
            size: data.len() as u64,
            modified: Utc::now(),
        };

        self.storage
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(Self::path_to_key(path), data);

        Ok(metadata)
    }

    async fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        let storage = self.storage.read().map_err(|_| Self::poisoned())?;

        storage
            .get(&Self::path_to_key(path))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))
    }

    async fn delete(&self, path: &StoragePath) -> Result<()> {
        let mut storage = self.storage.write().map_err(|_| Self::poisoned())?;

        storage
            .remove(&Self::path_to_key(path))
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))
    }
}
