//! File records.

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{conversion_err, from_millis, to_millis, RecordStore};
use lockbox_common::{ContentHash, Error, FileId, Result, StoragePath, UserId};

pub(crate) const FILE_COLUMNS: &str =
    "id, owner_id, storage_path, filename, uploaded_at, content_hash, is_encrypted";

/// Metadata for one uploaded file.
///
/// A record is *complete* once its ciphertext is stored and its content
/// hash recorded. Incomplete records are never served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub owner: UserId,
    /// Location of the ciphertext blob, relative to the blob store root.
    pub storage_path: StoragePath,
    /// Original filename as supplied at upload.
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    /// SHA-256 of the plaintext, set when the upload completes.
    pub content_hash: Option<ContentHash>,
    pub encrypted: bool,
}

impl FileRecord {
    /// Whether the upload finished and the record may be served.
    pub fn is_complete(&self) -> bool {
        self.encrypted && self.content_hash.is_some()
    }
}

pub(crate) fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let storage_path: String = row.get(2)?;
    let storage_path =
        StoragePath::parse(&storage_path).map_err(|e| conversion_err(2, Type::Text, e))?;

    let content_hash = row
        .get::<_, Option<String>>(5)?
        .map(ContentHash::from_hex)
        .transpose()
        .map_err(|e| conversion_err(5, Type::Text, e))?;

    Ok(FileRecord {
        id: FileId(row.get(0)?),
        owner: UserId(row.get(1)?),
        storage_path,
        filename: row.get(3)?,
        uploaded_at: from_millis(row.get(4)?),
        content_hash,
        encrypted: row.get(6)?,
    })
}

impl RecordStore {
    /// Insert an incomplete file record.
    ///
    /// # Errors
    /// - `NotFound` if `owner` does not exist
    pub fn create_file(
        &self,
        owner: UserId,
        storage_path: &StoragePath,
        filename: &str,
    ) -> Result<FileRecord> {
        let uploaded_at = from_millis(to_millis(Utc::now()));
        let path = storage_path.to_string_path();

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (owner_id, storage_path, filename, uploaded_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![owner.0, path, filename, to_millis(uploaded_at)],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(file_id = id, owner = %owner, "File record created");
        Ok(FileRecord {
            id: FileId(id),
            owner,
            storage_path: storage_path.clone(),
            filename: filename.to_string(),
            uploaded_at,
            content_hash: None,
            encrypted: false,
        })
    }

    /// Record the content hash and mark the file encrypted, completing it.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    pub fn complete_file(&self, id: FileId, hash: &ContentHash) -> Result<()> {
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE files SET content_hash = ?1, is_encrypted = 1 WHERE id = ?2",
                params![hash.as_str(), id.0],
            )
        })?;

        if changed == 0 {
            return Err(Error::NotFound(format!("File not found: {}", id)));
        }
        debug!(file_id = %id, "File record completed");
        Ok(())
    }

    /// Load a file record, complete or not.
    pub fn get_file(&self, id: FileId) -> Result<Option<FileRecord>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
                params![id.0],
                file_from_row,
            )
            .optional()
        })
    }

    /// Delete a file record together with its share grants.
    ///
    /// Returns whether a record was removed. Links are left in place and
    /// stop resolving because their file no longer exists.
    pub fn delete_file(&self, id: FileId) -> Result<bool> {
        let removed = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM file_shares WHERE file_id = ?1", params![id.0])?;
            let removed = tx.execute("DELETE FROM files WHERE id = ?1", params![id.0])?;
            tx.commit()?;
            Ok(removed)
        })?;

        if removed > 0 {
            debug!(file_id = %id, "File record deleted");
        }
        Ok(removed > 0)
    }

    /// Complete files owned by `owner`, newest first.
    pub fn list_owned_files(&self, owner: UserId) -> Result<Vec<FileRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM files
                 WHERE owner_id = ?1 AND is_encrypted = 1 AND content_hash IS NOT NULL
                 ORDER BY uploaded_at DESC, id DESC",
                FILE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![owner.0], file_from_row)?;
            rows.collect()
        })
    }

    /// Incomplete records whose upload started before `started_before`.
    ///
    /// Newer incomplete records may belong to an upload still in progress.
    pub fn list_incomplete_files(&self, started_before: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM files
                 WHERE (is_encrypted = 0 OR content_hash IS NULL) AND uploaded_at < ?1
                 ORDER BY id",
                FILE_COLUMNS
            ))?;
            let rows = stmt.query_map(params![to_millis(started_before)], file_from_row)?;
            rows.collect()
        })
    }
}
