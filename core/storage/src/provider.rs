//! Blob store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lockbox_common::{Result, StoragePath};

/// Metadata for a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobMetadata {
    /// Path of the blob relative to the store root.
    pub path: StoragePath,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time.
    pub modified: DateTime<Utc>,
}

/// Storage backend for ciphertext blobs.
///
/// Implementations store whole blobs; a blob is either fully written or
/// absent, never partially visible.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the backend name (e.g., "local", "memory").
    fn name(&self) -> &str;

    /// Write a blob, replacing any previous blob at the same path.
    ///
    /// # Postconditions
    /// - Parent directories exist
    /// - The blob is visible only once completely written
    ///
    /// # Errors
    /// - I/O errors
    async fn put(&self, path: &StoragePath, data: Vec<u8>) -> Result<BlobMetadata>;

    /// Read a whole blob.
    ///
    /// # Errors
    /// - `NotFound` if no blob exists at `path`
    async fn get(&self, path: &StoragePath) -> Result<Vec<u8>>;

    /// Delete a blob.
    ///
    /// # Errors
    /// - `NotFound` if no blob exists at `path`
    async fn delete(&self, path: &StoragePath) -> Result<()>;
}
