//! One-time share links.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{from_millis, to_millis, RecordStore};
use crate::files::{file_from_row, FileRecord, FILE_COLUMNS};
use lockbox_common::{FileId, Result};

/// Lifecycle state of a link at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Active,
    Expired,
    Consumed,
}

/// A stored one-time link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub id: i64,
    pub file: FileId,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
}

impl ShareLink {
    /// State at `now`. A link is still valid at exactly `expires_at`.
    pub fn state_at(&self, now: DateTime<Utc>) -> LinkState {
        if self.used {
            LinkState::Consumed
        } else if now > self.expires_at {
            LinkState::Expired
        } else {
            LinkState::Active
        }
    }
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<ShareLink> {
    Ok(ShareLink {
        id: row.get(0)?,
        file: FileId(row.get(1)?),
        token: row.get(2)?,
        created_at: from_millis(row.get(3)?),
        expires_at: from_millis(row.get(4)?),
        used: row.get(5)?,
    })
}

impl RecordStore {
    /// Store a new unused link.
    ///
    /// # Errors
    /// - `AlreadyExists` if the token collides with an existing link
    pub fn insert_link(
        &self,
        file: FileId,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ShareLink> {
        let created_at = from_millis(to_millis(Utc::now()));
        let expires_at = from_millis(to_millis(expires_at));

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO share_links (file_id, token, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![file.0, token, to_millis(created_at), to_millis(expires_at)],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(file_id = %file, link_id = id, "Share link stored");
        Ok(ShareLink {
            id,
            file,
            token: token.to_string(),
            created_at,
            expires_at,
            used: false,
        })
    }

    /// Look up a link without changing it.
    pub fn find_link(&self, token: &str) -> Result<Option<ShareLink>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, file_id, token, created_at, expires_at, is_used
                 FROM share_links WHERE token = ?1",
                params![token],
                link_from_row,
            )
            .optional()
        })
    }

    /// Atomically consume a link and return the file it grants.
    ///
    /// The link is marked used only if it is unused, unexpired at `now`, and
    /// its file still exists and is complete. Concurrent callers with the
    /// same token see exactly one success. Returns `None` on any failure,
    /// without saying which condition failed.
    pub fn consume_link(&self, token: &str, now: DateTime<Utc>) -> Result<Option<FileRecord>> {
        let now = to_millis(now);

        let record = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let file_id: Option<i64> = tx
                .query_row(
                    "UPDATE share_links SET is_used = 1
                     WHERE token = ?1 AND is_used = 0 AND expires_at >= ?2
                       AND EXISTS (
                           SELECT 1 FROM files f
                           WHERE f.id = share_links.file_id
                             AND f.is_encrypted = 1 AND f.content_hash IS NOT NULL
                       )
                     RETURNING file_id",
                    params![token, now],
                    |row| row.get(0),
                )
                .optional()?;

            let record = match file_id {
                Some(id) => Some(tx.query_row(
                    &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
                    params![id],
                    file_from_row,
                )?),
                None => None,
            };

            tx.commit()?;
            Ok(record)
        })?;

        if let Some(file) = &record {
            debug!(file_id = %file.id, "Share link consumed");
        }
        Ok(record)
    }
}
