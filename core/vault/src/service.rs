//! Vault service: upload, download, sharing and links.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::download::DecryptedFile;
use crate::links::LinkManager;
use crate::shares::{GrantOptions, GrantOutcome, ShareManager};
use lockbox_common::{ContentHash, Error, FileId, Result, StoragePath, UserId};
use lockbox_crypto::{decrypt_verified, encrypt_file, EnvFileKeyStore, KeyManager, KeyMaterial};
use lockbox_records::{FileRecord, LinkState, Permission, RecordStore, ShareLink, User};
use lockbox_storage::{BlobStore, LocalBlobStore};

/// Longest accepted filename, in bytes.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// A file shared with the requester.
#[derive(Debug, Clone, Serialize)]
pub struct SharedFile {
    pub file: FileRecord,
    /// Strongest active permission held.
    pub permission: Permission,
    pub shared_by: UserId,
    /// Latest expiry among the active grants; `None` if any never lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Files visible to one user.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileListing {
    pub owned: Vec<FileRecord>,
    pub shared: Vec<SharedFile>,
}

/// Encrypted per-user file vault.
///
/// Holds the installation key for its whole lifetime. Safe to share
/// across tasks behind an `Arc`.
pub struct VaultService {
    key: KeyMaterial,
    records: Arc<RecordStore>,
    blobs: Arc<dyn BlobStore>,
    shares: ShareManager,
    links: LinkManager,
    blob_dir: StoragePath,
    config: VaultConfig,
}

impl VaultService {
    /// Open the vault described by `config`.
    ///
    /// # Postconditions
    /// - The data directory exists
    /// - The encryption key exists and is persisted
    /// - Interrupted uploads older than the grace period are swept
    ///
    /// # Errors
    /// - `Config` for an invalid configuration
    /// - `KeyStore` if the key cannot be loaded or created
    /// - `Database` if the record store cannot be opened
    pub async fn open(config: VaultConfig) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.data_dir).await?;

        let key_manager = KeyManager::new(EnvFileKeyStore::new(
            config.key_file_path(),
            config.key_name.clone(),
        ));
        let key = key_manager.get_or_create_key()?;

        let records = Arc::new(RecordStore::open(config.database_path())?);
        let blobs: Arc<dyn BlobStore> = Arc::new(LocalBlobStore::new(&config.data_dir)?);

        let service = Self::new(config, key, records, blobs)?;
        let swept = service.sweep_incomplete().await?;

        info!(
            data_dir = %service.config.data_dir.display(),
            blob_store = service.blobs.name(),
            swept,
            "Vault opened"
        );
        Ok(service)
    }

    /// Assemble a service from already opened parts.
    ///
    /// # Errors
    /// - `Config` for an invalid configuration
    pub fn new(
        config: VaultConfig,
        key: KeyMaterial,
        records: Arc<RecordStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        config.validate()?;
        let blob_dir = config.blob_dir_path()?;

        Ok(Self {
            key,
            shares: ShareManager::new(Arc::clone(&records)),
            links: LinkManager::new(Arc::clone(&records), config.link_validity()),
            records,
            blobs,
            blob_dir,
            config,
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub fn shares(&self) -> &ShareManager {
        &self.shares
    }

    pub fn links(&self) -> &LinkManager {
        &self.links
    }

    /// Register a new user.
    pub fn register_user(&self, username: &str) -> Result<User> {
        let user = self.records.create_user(username)?;
        info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Look up a user by username.
    ///
    /// # Errors
    /// - `NotFound` if no such user exists
    pub fn find_user(&self, username: &str) -> Result<User> {
        self.records
            .find_user(username)?
            .ok_or_else(|| Error::NotFound(format!("User not found: {}", username)))
    }

    /// Encrypt and store an uploaded file.
    ///
    /// The record is created first and completed once the ciphertext is
    /// stored. Any failure in between removes both the record and whatever
    /// ciphertext was written.
    ///
    /// # Errors
    /// - `InvalidInput` for a bad filename, a rejected extension or an
    ///   oversized file
    /// - `NotFound` if `owner` does not exist
    /// - `Encryption`, `Storage`, `Io` or `Database` if storing fails
    pub async fn upload(&self, owner: UserId, filename: &str, data: &[u8]) -> Result<FileRecord> {
        self.validate_upload(filename, data)?;
        if self.records.get_user(owner)?.is_none() {
            return Err(Error::NotFound(format!("User not found: {}", owner)));
        }

        let storage_path = self
            .blob_dir
            .join(&format!("{}_{}", Uuid::new_v4(), filename))?;
        let mut record = self.records.create_file(owner, &storage_path, filename)?;

        debug!(file_id = %record.id, size = data.len(), "Encrypting upload");

        match self.store_ciphertext(&record, data).await {
            Ok(hash) => {
                record.content_hash = Some(hash);
                record.encrypted = true;
                info!(file_id = %record.id, owner = %owner, size = data.len(), "File uploaded");
                Ok(record)
            }
            Err(e) => {
                warn!(file_id = %record.id, error = %e, "Upload failed, rolling back");
                self.discard(&record).await;
                Err(e)
            }
        }
    }

    async fn store_ciphertext(&self, record: &FileRecord, data: &[u8]) -> Result<ContentHash> {
        let sealed = encrypt_file(&self.key, data)?;
        self.blobs
            .put(&record.storage_path, sealed.ciphertext)
            .await?;
        self.records.complete_file(record.id, &sealed.content_hash)?;
        Ok(sealed.content_hash)
    }

    /// Remove a record and its blob, logging instead of failing.
    async fn discard(&self, record: &FileRecord) {
        match self.blobs.delete(&record.storage_path).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => warn!(file_id = %record.id, error = %e, "Failed to remove ciphertext"),
        }
        if let Err(e) = self.records.delete_file(record.id) {
            warn!(file_id = %record.id, error = %e, "Failed to remove file record");
        }
    }

    fn validate_upload(&self, filename: &str, data: &[u8]) -> Result<()> {
        if filename.is_empty()
            || filename == "."
            || filename == ".."
            || filename.len() > MAX_FILENAME_LENGTH
            || filename.contains(['/', '\\', '\0'])
        {
            return Err(Error::InvalidInput(format!("Invalid filename: {:?}", filename)));
        }
        if !self.config.extension_allowed(filename) {
            return Err(Error::InvalidInput(format!(
                "File type not allowed: {}",
                filename
            )));
        }
        if data.len() as u64 > self.config.max_file_size {
            return Err(Error::InvalidInput(format!(
                "File exceeds the {} byte limit",
                self.config.max_file_size
            )));
        }
        Ok(())
    }

    /// Decrypt a file for `requester`.
    ///
    /// Requires `view` access, or `download` with `strict_permissions`.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist, is incomplete, or its
    ///   ciphertext is missing
    /// - `PermissionDenied` without sufficient access
    /// - `Authentication` or `HashMismatch` if the stored data fails
    ///   verification
    pub async fn download(&self, file: FileId, requester: UserId) -> Result<DecryptedFile> {
        let record = self
            .records
            .get_file(file)?
            .filter(FileRecord::is_complete)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", file)))?;

        let required = if self.config.strict_permissions {
            Permission::Download
        } else {
            Permission::View
        };
        if !self.shares.check_access(&record, requester, required)? {
            debug!(file_id = %file, user = %requester, "Download denied");
            return Err(Error::PermissionDenied(
                "You do not have permission to download this file".to_string(),
            ));
        }

        let decrypted = self.materialize(&record).await?;
        info!(file_id = %file, user = %requester, size = decrypted.len(), "File downloaded");
        Ok(decrypted)
    }

    /// Redeem a share link and decrypt its file.
    ///
    /// The link is consumed before decryption starts; a later failure does
    /// not restore it.
    ///
    /// # Errors
    /// - `LinkInvalid` if the link cannot be redeemed
    /// - Anything [`download`](Self::download) reports after access is granted
    pub async fn access_link(&self, token: &str) -> Result<DecryptedFile> {
        self.access_link_at(token, Utc::now()).await
    }

    /// [`access_link`](Self::access_link) evaluated at `now`.
    pub async fn access_link_at(&self, token: &str, now: DateTime<Utc>) -> Result<DecryptedFile> {
        let record = self.links.redeem_at(token, now)?;
        let decrypted = self.materialize(&record).await?;
        info!(file_id = %record.id, size = decrypted.len(), "File served by link");
        Ok(decrypted)
    }

    async fn materialize(&self, record: &FileRecord) -> Result<DecryptedFile> {
        let expected = record
            .content_hash
            .as_ref()
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", record.id)))?;

        let ciphertext = match self.blobs.get(&record.storage_path).await {
            Ok(data) => data,
            Err(Error::NotFound(_)) => {
                warn!(file_id = %record.id, "Ciphertext missing");
                return Err(Error::NotFound("file not found on the server".to_string()));
            }
            Err(e) => return Err(e),
        };

        let plaintext = decrypt_verified(&self.key, &ciphertext, expected).map_err(|e| {
            if e.is_integrity_failure() {
                warn!(file_id = %record.id, error = %e, "Integrity check failed");
            }
            e
        })?;

        DecryptedFile::materialize(&record.filename, &plaintext, self.config.temp_dir.as_deref())
    }

    /// Delete a file, its grants and its ciphertext.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - `PermissionDenied` if `requester` is not the owner
    pub async fn delete_file(&self, file: FileId, requester: UserId) -> Result<()> {
        let record = self
            .records
            .get_file(file)?
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", file)))?;

        if record.owner != requester {
            return Err(Error::PermissionDenied(
                "Only the owner can delete this file".to_string(),
            ));
        }

        self.records.delete_file(file)?;
        match self.blobs.delete(&record.storage_path).await {
            Ok(()) => {}
            Err(Error::NotFound(_)) => {
                warn!(file_id = %file, "Ciphertext already missing at delete")
            }
            Err(e) => warn!(file_id = %file, error = %e, "Failed to remove ciphertext"),
        }

        info!(file_id = %file, "File deleted");
        Ok(())
    }

    /// Files owned by `user` and files actively shared with them.
    pub fn list_files(&self, user: UserId) -> Result<FileListing> {
        let now = Utc::now();
        let owned = self.records.list_owned_files(user)?;

        let mut shared: BTreeMap<FileId, SharedFile> = BTreeMap::new();
        for grant in self.records.grants_received(user)? {
            if !grant.is_active_at(now) {
                continue;
            }
            if let Some(entry) = shared.get_mut(&grant.file) {
                entry.permission = entry.permission.max(grant.permission);
                entry.expires_at = match (entry.expires_at, grant.expires_at) {
                    (Some(a), Some(b)) => Some(a.max(b)),
                    _ => None,
                };
                continue;
            }
            let Some(file) = self.records.get_file(grant.file)? else {
                continue;
            };
            if !file.is_complete() {
                continue;
            }
            shared.insert(
                grant.file,
                SharedFile {
                    file,
                    permission: grant.permission,
                    shared_by: grant.granted_by,
                    expires_at: grant.expires_at,
                },
            );
        }

        Ok(FileListing {
            owned,
            shared: shared.into_values().collect(),
        })
    }

    /// Share a file with another user. See [`ShareManager::grant`].
    pub fn share(
        &self,
        file: FileId,
        granter: UserId,
        grantee: UserId,
        permission: Permission,
        options: GrantOptions,
    ) -> Result<GrantOutcome> {
        self.shares.grant(file, granter, grantee, permission, options)
    }

    /// Create a one-time link. See [`LinkManager::generate`].
    pub fn generate_link(&self, file: FileId, requester: UserId) -> Result<ShareLink> {
        self.links.generate(file, requester)
    }

    /// Current state of a link without consuming it.
    pub fn inspect_link(&self, token: &str) -> Result<(ShareLink, LinkState)> {
        self.links.inspect(token)
    }

    /// Remove records left by interrupted uploads, with their ciphertext.
    ///
    /// Only uploads older than the configured grace period are touched, so
    /// an upload running in another process survives.
    ///
    /// Returns the number of records removed.
    pub async fn sweep_incomplete(&self) -> Result<usize> {
        self.sweep_incomplete_before(Utc::now() - self.config.incomplete_grace())
            .await
    }

    /// Remove incomplete uploads started before `cutoff`.
    pub async fn sweep_incomplete_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let incomplete = self.records.list_incomplete_files(cutoff)?;
        for record in &incomplete {
            debug!(file_id = %record.id, "Sweeping incomplete upload");
            self.discard(record).await;
        }
        if !incomplete.is_empty() {
            info!(count = incomplete.len(), "Swept incomplete uploads");
        }
        Ok(incomplete.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lockbox_crypto::content_hash;
    use lockbox_storage::{BlobMetadata, MemoryBlobStore};
    use tempfile::TempDir;

    const REPORT: &[u8] = b"0123456789";

    struct Harness {
        service: Arc<VaultService>,
        blobs: MemoryBlobStore,
        key: KeyMaterial,
        alice: UserId,
        bob: UserId,
        temp: TempDir,
    }

    fn harness_with(configure: impl FnOnce(&mut VaultConfig)) -> Harness {
        let temp = TempDir::new().unwrap();
        let mut config = VaultConfig::with_data_dir(temp.path());
        config.temp_dir = Some(temp.path().to_path_buf());
        configure(&mut config);

        let key = KeyMaterial::generate();
        let blobs = MemoryBlobStore::new();
        let records = Arc::new(RecordStore::in_memory().unwrap());
        let service = VaultService::new(config, key.clone(), records, Arc::new(blobs.clone()))
            .unwrap();

        let alice = service.register_user("alice").unwrap().id;
        let bob = service.register_user("bob").unwrap().id;

        Harness {
            service: Arc::new(service),
            blobs,
            key,
            alice,
            bob,
            temp,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    fn temp_file_count(h: &Harness) -> usize {
        std::fs::read_dir(h.temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".lockbox-"))
            .count()
    }

    #[tokio::test]
    async fn test_report_scenario() {
        let h = harness();

        let record = h.service.upload(h.alice, "report.pdf", REPORT).await.unwrap();
        assert!(record.is_complete());
        assert_eq!(record.content_hash, Some(content_hash(REPORT).unwrap()));

        let stored = h.blobs.get(&record.storage_path).await.unwrap();
        assert_ne!(stored.as_slice(), REPORT);
        assert!(record
            .storage_path
            .to_string_path()
            .starts_with("encrypted_files/"));
        assert!(record.storage_path.to_string_path().ends_with("_report.pdf"));

        let own = h.service.download(record.id, h.alice).await.unwrap();
        assert_eq!(own.filename(), "report.pdf");
        assert_eq!(own.read_to_vec().unwrap(), REPORT);

        assert!(matches!(
            h.service.download(record.id, h.bob).await,
            Err(Error::PermissionDenied(_))
        ));

        h.service
            .share(record.id, h.alice, h.bob, Permission::View, GrantOptions::default())
            .unwrap();

        let shared = h.service.download(record.id, h.bob).await.unwrap();
        assert_eq!(shared.read_to_vec().unwrap(), REPORT);
        assert_eq!(shared.filename(), "report.pdf");
    }

    #[tokio::test]
    async fn test_strict_permissions_require_download() {
        let h = harness_with(|config| config.strict_permissions = true);
        let record = h.service.upload(h.alice, "a.txt", b"abc").await.unwrap();

        h.service
            .share(record.id, h.alice, h.bob, Permission::View, GrantOptions::default())
            .unwrap();
        assert!(matches!(
            h.service.download(record.id, h.bob).await,
            Err(Error::PermissionDenied(_))
        ));

        let forced = GrantOptions {
            force: true,
            expires_at: None,
        };
        h.service
            .share(record.id, h.alice, h.bob, Permission::Download, forced)
            .unwrap();
        assert!(h.service.download(record.id, h.bob).await.is_ok());
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let h = harness_with(|config| config.max_file_size = 4);

        for name in ["", "..", "a/b.txt", "a\\b.txt"] {
            assert!(matches!(
                h.service.upload(h.alice, name, b"x").await,
                Err(Error::InvalidInput(_))
            ));
        }
        assert!(matches!(
            h.service.upload(h.alice, "run.sh", b"x").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            h.service.upload(h.alice, "big.txt", b"12345").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            h.service.upload(UserId(404), "a.txt", b"x").await,
            Err(Error::NotFound(_))
        ));
        assert!(h.blobs.is_empty());
    }

    /// Writes the blob, then reports failure.
    struct FlakyBlobStore {
        inner: MemoryBlobStore,
    }

    #[async_trait]
    impl BlobStore for FlakyBlobStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn put(&self, path: &StoragePath, data: Vec<u8>) -> Result<BlobMetadata> {
            self.inner.put(path, data).await?;
            Err(Error::Storage("disk full".to_string()))
        }

        async fn get(&self, path: &StoragePath) -> Result<Vec<u8>> {
            self.inner.get(path).await
        }

        async fn delete(&self, path: &StoragePath) -> Result<()> {
            self.inner.delete(path).await
        }
    }

    #[tokio::test]
    async fn test_upload_rollback_on_storage_failure() {
        let inner = MemoryBlobStore::new();
        let records = Arc::new(RecordStore::in_memory().unwrap());
        let service = VaultService::new(
            VaultConfig::default(),
            KeyMaterial::generate(),
            Arc::clone(&records),
            Arc::new(FlakyBlobStore {
                inner: inner.clone(),
            }),
        )
        .unwrap();
        let alice = service.register_user("alice").unwrap().id;

        let result = service.upload(alice, "a.txt", b"data").await;

        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(inner.is_empty());
        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(records.list_incomplete_files(later).unwrap().is_empty());
        assert!(service.list_files(alice).unwrap().owned.is_empty());
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_not_served() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"secret").await.unwrap();

        h.blobs
            .tamper(&record.storage_path, |data| {
                let last = data.len() - 1;
                data[last] ^= 0x01;
            })
            .unwrap();

        let result = h.service.download(record.id, h.alice).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
        assert_eq!(temp_file_count(&h), 0);
    }

    #[tokio::test]
    async fn test_hash_mismatch_not_served() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"original").await.unwrap();

        let swapped = encrypt_file(&h.key, b"replaced").unwrap();
        h.blobs
            .put(&record.storage_path, swapped.ciphertext)
            .await
            .unwrap();

        let result = h.service.download(record.id, h.alice).await;
        assert!(matches!(result, Err(Error::HashMismatch { .. })));
        assert_eq!(temp_file_count(&h), 0);
    }

    #[tokio::test]
    async fn test_missing_ciphertext() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"data").await.unwrap();
        h.blobs.delete(&record.storage_path).await.unwrap();

        let result = h.service.download(record.id, h.alice).await;
        assert!(matches!(result, Err(Error::NotFound(ref m)) if m == "file not found on the server"));
    }

    #[tokio::test]
    async fn test_temp_file_removed_on_drop() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"data").await.unwrap();

        let decrypted = h.service.download(record.id, h.alice).await.unwrap();
        let path = decrypted.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(temp_file_count(&h), 1);

        drop(decrypted);
        assert!(!path.exists());
        assert_eq!(temp_file_count(&h), 0);
    }

    #[tokio::test]
    async fn test_link_single_use() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"linked").await.unwrap();
        let link = h.service.generate_link(record.id, h.alice).unwrap();

        let served = h.service.access_link(&link.token).await.unwrap();
        assert_eq!(served.read_to_vec().unwrap(), b"linked");

        assert!(matches!(
            h.service.access_link(&link.token).await,
            Err(Error::LinkInvalid(_))
        ));
        let (_, state) = h.service.inspect_link(&link.token).unwrap();
        assert_eq!(state, LinkState::Consumed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_link_access_serves_once() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"race").await.unwrap();
        let token = h.service.generate_link(record.id, h.alice).unwrap().token;

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let service = Arc::clone(&h.service);
                let token = token.clone();
                tokio::spawn(async move { service.access_link(&token).await })
            })
            .collect();

        let mut served = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(file) => {
                    assert_eq!(file.read_to_vec().unwrap(), b"race");
                    served += 1;
                }
                Err(e) => assert!(matches!(e, Error::LinkInvalid(_))),
            }
        }
        assert_eq!(served, 1);
    }

    #[tokio::test]
    async fn test_expired_link_not_served() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"late").await.unwrap();
        let link = h.service.generate_link(record.id, h.alice).unwrap();

        let late = link.expires_at + chrono::Duration::milliseconds(1);
        assert!(matches!(
            h.service.access_link_at(&link.token, late).await,
            Err(Error::LinkInvalid(_))
        ));
        assert_eq!(temp_file_count(&h), 0);
    }

    #[tokio::test]
    async fn test_link_owner_only() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"x").await.unwrap();

        assert!(matches!(
            h.service.generate_link(record.id, h.bob),
            Err(Error::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let h = harness();
        let record = h.service.upload(h.alice, "a.txt", b"gone").await.unwrap();
        h.service
            .share(record.id, h.alice, h.bob, Permission::Download, GrantOptions::default())
            .unwrap();
        let link = h.service.generate_link(record.id, h.alice).unwrap();

        assert!(matches!(
            h.service.delete_file(record.id, h.bob).await,
            Err(Error::PermissionDenied(_))
        ));

        h.service.delete_file(record.id, h.alice).await.unwrap();

        assert!(h.blobs.is_empty());
        assert!(h.service.records().grants_of_file(record.id).unwrap().is_empty());
        assert!(h.service.list_files(h.bob).unwrap().shared.is_empty());
        assert!(matches!(
            h.service.download(record.id, h.alice).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            h.service.access_link(&link.token).await,
            Err(Error::LinkInvalid(_))
        ));
        assert!(matches!(
            h.service.delete_file(record.id, h.alice).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_files() {
        let h = harness();
        let mine = h.service.upload(h.alice, "mine.txt", b"1").await.unwrap();
        let theirs = h.service.upload(h.bob, "theirs.txt", b"2").await.unwrap();
        h.service
            .share(theirs.id, h.bob, h.alice, Permission::View, GrantOptions::default())
            .unwrap();
        h.service
            .share(
                theirs.id,
                h.bob,
                h.alice,
                Permission::Download,
                GrantOptions {
                    force: true,
                    expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                },
            )
            .unwrap();

        let listing = h.service.list_files(h.alice).unwrap();
        assert_eq!(listing.owned.len(), 1);
        assert_eq!(listing.owned[0].id, mine.id);
        assert_eq!(listing.shared.len(), 1);
        assert_eq!(listing.shared[0].file.id, theirs.id);
        assert_eq!(listing.shared[0].permission, Permission::Download);
        assert_eq!(listing.shared[0].shared_by, h.bob);
        assert_eq!(listing.shared[0].expires_at, None);
    }

    #[tokio::test]
    async fn test_sweep_incomplete() {
        let h = harness();
        let done = h.service.upload(h.alice, "done.txt", b"ok").await.unwrap();

        let path = StoragePath::parse("encrypted_files/partial_a.txt").unwrap();
        h.blobs.put(&path, vec![1, 2, 3]).await.unwrap();
        let pending = h.service.records().create_file(h.alice, &path, "a.txt").unwrap();

        // Too recent for the default grace period.
        assert_eq!(h.service.sweep_incomplete().await.unwrap(), 0);
        assert!(h.service.records().get_file(pending.id).unwrap().is_some());

        let cutoff = pending.uploaded_at + chrono::Duration::milliseconds(1);
        assert_eq!(h.service.sweep_incomplete_before(cutoff).await.unwrap(), 1);
        assert!(h.service.records().get_file(pending.id).unwrap().is_none());
        assert!(matches!(h.blobs.get(&path).await, Err(Error::NotFound(_))));
        assert!(h.service.records().get_file(done.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_keeps_upload_in_progress() {
        let temp = TempDir::new().unwrap();
        let config = VaultConfig::with_data_dir(temp.path().join("data"));

        let first = VaultService::open(config.clone()).await.unwrap();
        let alice = first.register_user("alice").unwrap().id;
        let path = first.blob_dir.join("pending_a.txt").unwrap();
        let pending = first.records().create_file(alice, &path, "a.txt").unwrap();

        // A second process opening the same vault mid-upload.
        let second = VaultService::open(config.clone()).await.unwrap();
        assert!(second.records().get_file(pending.id).unwrap().is_some());

        let hash = content_hash(b"data").unwrap();
        first.records().complete_file(pending.id, &hash).unwrap();
        assert!(second
            .records()
            .get_file(pending.id)
            .unwrap()
            .is_some_and(|record| record.is_complete()));
    }

    #[tokio::test]
    async fn test_open_sweeps_abandoned_upload() {
        let temp = TempDir::new().unwrap();
        let mut config = VaultConfig::with_data_dir(temp.path().join("data"));
        config.incomplete_grace_minutes = 0;

        let first = VaultService::open(config.clone()).await.unwrap();
        let alice = first.register_user("alice").unwrap().id;
        let path = first.blob_dir.join("abandoned_a.txt").unwrap();
        let pending = first.records().create_file(alice, &path, "a.txt").unwrap();
        drop(first);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let reopened = VaultService::open(config).await.unwrap();
        assert!(reopened.records().get_file(pending.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_persists_key_across_restarts() {
        let temp = TempDir::new().unwrap();
        let config = VaultConfig::with_data_dir(temp.path().join("data"));

        let (alice, file) = {
            let service = VaultService::open(config.clone()).await.unwrap();
            let alice = service.register_user("alice").unwrap().id;
            let file = service.upload(alice, "a.txt", b"persisted").await.unwrap();
            (alice, file.id)
        };

        let reopened = VaultService::open(config.clone()).await.unwrap();
        let decrypted = reopened.download(file, alice).await.unwrap();
        assert_eq!(decrypted.read_to_vec().unwrap(), b"persisted");
        assert!(config.key_file_path().exists());
        assert!(config.database_path().exists());
    }
}
