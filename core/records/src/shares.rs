//! Direct share grants between users.

use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::db::{conversion_err, from_millis, to_millis, RecordStore};
use lockbox_common::{Error, FileId, Result, UserId};

/// Access level carried by a share grant.
///
/// Levels are ordered: `Download` includes everything `View` allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    Download,
}

impl Permission {
    /// Whether a grant at this level satisfies `required`.
    pub fn allows(self, required: Permission) -> bool {
        self >= required
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::View => "view",
            Permission::Download => "download",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "view" => Ok(Permission::View),
            "download" => Ok(Permission::Download),
            other => Err(Error::InvalidInput(format!(
                "Unknown permission '{}', expected 'view' or 'download'",
                other
            ))),
        }
    }
}

/// A grant to be inserted.
#[derive(Debug, Clone)]
pub struct NewShareGrant {
    pub file: FileId,
    pub granted_by: UserId,
    pub granted_to: UserId,
    pub permission: Permission,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A stored share grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub id: i64,
    pub file: FileId,
    pub granted_by: UserId,
    pub granted_to: UserId,
    pub permission: Permission,
    pub shared_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ShareGrant {
    /// Whether the grant is in force at `now`. Grants without an expiry
    /// never lapse.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| now <= expires)
    }
}

const GRANT_COLUMNS: &str =
    "id, file_id, shared_by, shared_with, permission, shared_at, expires_at";

fn grant_from_row(row: &Row<'_>) -> rusqlite::Result<ShareGrant> {
    let permission: String = row.get(4)?;
    let permission = permission
        .parse()
        .map_err(|e| conversion_err(4, Type::Text, e))?;

    Ok(ShareGrant {
        id: row.get(0)?,
        file: FileId(row.get(1)?),
        granted_by: UserId(row.get(2)?),
        granted_to: UserId(row.get(3)?),
        permission,
        shared_at: from_millis(row.get(5)?),
        expires_at: row.get::<_, Option<i64>>(6)?.map(from_millis),
    })
}

impl RecordStore {
    /// Insert a share grant. Duplicates are not checked here.
    ///
    /// # Errors
    /// - `NotFound` if the file or either user does not exist
    pub fn insert_grant(&self, grant: &NewShareGrant) -> Result<ShareGrant> {
        let shared_at = from_millis(to_millis(Utc::now()));
        let expires_at = grant.expires_at.map(|t| from_millis(to_millis(t)));

        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO file_shares
                 (file_id, shared_by, shared_with, permission, shared_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    grant.file.0,
                    grant.granted_by.0,
                    grant.granted_to.0,
                    grant.permission.as_str(),
                    to_millis(shared_at),
                    expires_at.map(to_millis),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(
            file_id = %grant.file,
            grantee = %grant.granted_to,
            permission = %grant.permission,
            "Share grant stored"
        );

        Ok(ShareGrant {
            id,
            file: grant.file,
            granted_by: grant.granted_by,
            granted_to: grant.granted_to,
            permission: grant.permission,
            shared_at,
            expires_at,
        })
    }

    /// All grants of `file` to `grantee`, expired ones included.
    pub fn grants_for(&self, file: FileId, grantee: UserId) -> Result<Vec<ShareGrant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM file_shares
                 WHERE file_id = ?1 AND shared_with = ?2
                 ORDER BY id",
                GRANT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![file.0, grantee.0], grant_from_row)?;
            rows.collect()
        })
    }

    /// All grants of `file`, for the owner's overview.
    pub fn grants_of_file(&self, file: FileId) -> Result<Vec<ShareGrant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM file_shares WHERE file_id = ?1 ORDER BY id",
                GRANT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![file.0], grant_from_row)?;
            rows.collect()
        })
    }

    /// All grants received by `grantee`, expired ones included.
    pub fn grants_received(&self, grantee: UserId) -> Result<Vec<ShareGrant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM file_shares WHERE shared_with = ?1 ORDER BY id",
                GRANT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![grantee.0], grant_from_row)?;
            rows.collect()
        })
    }
}
