//! SQLite connection management and schema.

use chrono::{DateTime, Utc};
use rusqlite::{ffi, types::Type, Connection, ErrorCode};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

use lockbox_common::{Error, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    storage_path TEXT NOT NULL,
    filename TEXT NOT NULL,
    uploaded_at INTEGER NOT NULL,
    content_hash TEXT,
    is_encrypted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id);

CREATE TABLE IF NOT EXISTS file_shares (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    shared_by INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    shared_with INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    permission TEXT NOT NULL CHECK (permission IN ('view', 'download')),
    shared_at INTEGER NOT NULL,
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_shares_file_grantee ON file_shares(file_id, shared_with);
CREATE INDEX IF NOT EXISTS idx_shares_grantee ON file_shares(shared_with);

-- No foreign key: links outlive their file and simply stop resolving.
CREATE TABLE IF NOT EXISTS share_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_id INTEGER NOT NULL,
    token TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    is_used INTEGER NOT NULL DEFAULT 0
);
"#;

/// SQLite-backed store for users, files, shares and links.
///
/// A single connection is shared behind a mutex; every operation holds the
/// lock for its whole duration.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Create or open a record database.
    ///
    /// # Postconditions
    /// - Schema exists
    /// - Foreign keys are enforced, WAL journaling is enabled
    ///
    /// # Errors
    /// - Database creation or migration failure
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| {
            row.get::<_, String>(0)
        })
        .map_err(db_err)?;

        let store = Self::init(conn)?;
        info!(path = %db_path.as_ref().display(), "Record store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| Error::Database("Record store lock poisoned".to_string()))?;
        f(&mut conn).map_err(db_err)
    }
}

/// Map a SQLite error into the common error type.
pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE => Error::AlreadyExists(e.to_string()),
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                    Error::NotFound("Referenced record does not exist".to_string())
                }
                _ => Error::InvalidInput(e.to_string()),
            }
        }
        _ => Error::Database(e.to_string()),
    }
}

/// Wrap a domain validation error raised while decoding a column.
pub(crate) fn conversion_err(column: usize, ty: Type, e: Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, ty, Box::new(e))
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
