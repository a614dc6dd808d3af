//! Local filesystem blob store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::provider::{BlobMetadata, BlobStore};
use lockbox_common::{Error, Result, StoragePath};

/// Local filesystem blob store.
///
/// Stores blobs in a directory tree below `root`.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a StoragePath to a filesystem path.
    fn to_fs_path(&self, path: &StoragePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn create_metadata(path: &StoragePath, fs_meta: &std::fs::Metadata) -> BlobMetadata {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        BlobMetadata {
            path: path.clone(),
            size: fs_meta.len(),
            modified,
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn put(&self, path: &StoragePath, data: Vec<u8>) -> Result<BlobMetadata> {
        let name = path
            .name()
            .ok_or_else(|| Error::InvalidInput("Blob path cannot be the root".to_string()))?;
        let fs_path = self.to_fs_path(path);

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename so readers never observe a
        // partially written blob.
        let partial = fs_path.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4()));
        if let Err(e) = fs::write(&partial, &data).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&partial, &fs_path).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e.into());
        }

        debug!(path = %path, size = data.len(), "Blob written");

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(Self::create_metadata(path, &fs_meta))
    }

    async fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(path);

        match fs::read(&fs_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob not found: {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &StoragePath) -> Result<()> {
        let fs_path = self.to_fs_path(path);

        if fs_path.is_dir() {
            return Err(Error::InvalidInput("Cannot delete a directory".to_string()));
        }

        match fs::remove_file(&fs_path).await {
            Ok(()) => {
                debug!(path = %path, "Blob deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob not found: {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }
}
