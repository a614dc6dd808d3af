//! User accounts.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{from_millis, to_millis, RecordStore};
use lockbox_common::{Error, Result, UserId};

/// Maximum username length.
pub const MAX_USERNAME_LENGTH: usize = 150;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: UserId(row.get(0)?),
        username: row.get(1)?,
        created_at: from_millis(row.get(2)?),
    })
}

fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() || username.trim() != username {
        return Err(Error::InvalidInput(
            "Username must be non-empty without surrounding whitespace".to_string(),
        ));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(Error::InvalidInput(format!(
            "Username longer than {} characters",
            MAX_USERNAME_LENGTH
        )));
    }
    Ok(())
}

impl RecordStore {
    /// Register a new user.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty or overlong username
    /// - `AlreadyExists` if the username is taken
    pub fn create_user(&self, username: &str) -> Result<User> {
        validate_username(username)?;
        let created_at = Utc::now();

        let id = self
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO users (username, created_at) VALUES (?1, ?2)",
                    params![username, to_millis(created_at)],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .map_err(|e| match e {
                Error::AlreadyExists(_) => {
                    Error::AlreadyExists(format!("User already exists: {}", username))
                }
                other => other,
            })?;

        debug!(user_id = id, "User created");
        Ok(User {
            id: UserId(id),
            username: username.to_string(),
            created_at: from_millis(to_millis(created_at)),
        })
    }

    /// Look up a user by id.
    pub fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id.0],
                user_from_row,
            )
            .optional()
        })
    }

    /// Look up a user by username.
    pub fn find_user(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, username, created_at FROM users WHERE username = ?1",
                params![username],
                user_from_row,
            )
            .optional()
        })
    }
}
