//! Direct sharing between users.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use lockbox_common::{Error, FileId, Result, UserId};
use lockbox_records::{FileRecord, NewShareGrant, Permission, RecordStore, ShareGrant};

/// Options for [`ShareManager::grant`].
#[derive(Debug, Clone, Default)]
pub struct GrantOptions {
    /// Create a new grant even if the grantee already has one.
    pub force: bool,
    /// When the grant lapses; `None` never lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Result of a grant request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    /// A new grant was stored.
    Granted(ShareGrant),
    /// The grantee already holds a grant for the file; nothing was written.
    AlreadyShared { existing: ShareGrant },
}

impl GrantOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, GrantOutcome::Granted(_))
    }
}

/// Grants and checks per-user access to files.
pub struct ShareManager {
    records: Arc<RecordStore>,
}

impl ShareManager {
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Share `file` with `grantee`.
    ///
    /// # Preconditions
    /// - `granter` owns the file
    /// - `grantee` is a different, existing user
    ///
    /// # Postconditions
    /// - Without `force`, an existing grant for the same grantee yields
    ///   `AlreadyShared` and no write
    /// - With `force`, a new independent grant is always stored
    ///
    /// # Errors
    /// - `SelfShare` if `grantee == granter`
    /// - `NotFound` if the file or grantee does not exist
    /// - `PermissionDenied` if `granter` does not own the file
    pub fn grant(
        &self,
        file: FileId,
        granter: UserId,
        grantee: UserId,
        permission: Permission,
        options: GrantOptions,
    ) -> Result<GrantOutcome> {
        if granter == grantee {
            return Err(Error::SelfShare);
        }

        let record = self.complete_file(file)?;
        if record.owner != granter {
            return Err(Error::PermissionDenied(
                "Only the owner can share this file".to_string(),
            ));
        }

        if !options.force {
            if let Some(existing) = self.records.grants_for(file, grantee)?.into_iter().next() {
                debug!(file_id = %file, grantee = %grantee, "File already shared");
                return Ok(GrantOutcome::AlreadyShared { existing });
            }
        }

        let grant = self.records.insert_grant(&NewShareGrant {
            file,
            granted_by: granter,
            granted_to: grantee,
            permission,
            expires_at: options.expires_at,
        })?;

        info!(
            file_id = %file,
            grantee = %grantee,
            permission = %permission,
            forced = options.force,
            "File shared"
        );
        Ok(GrantOutcome::Granted(grant))
    }

    /// Whether `user` may access `file` at `required` level now.
    pub fn check_access(
        &self,
        file: &FileRecord,
        user: UserId,
        required: Permission,
    ) -> Result<bool> {
        self.check_access_at(file, user, required, Utc::now())
    }

    /// Access check evaluated at `now`.
    ///
    /// The owner always has access. Anyone else needs a grant that is
    /// unexpired at `now` and whose permission covers `required`.
    pub fn check_access_at(
        &self,
        file: &FileRecord,
        user: UserId,
        required: Permission,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if file.owner == user {
            return Ok(true);
        }

        let allowed = self
            .records
            .grants_for(file.id, user)?
            .iter()
            .any(|grant| grant.is_active_at(now) && grant.permission.allows(required));
        Ok(allowed)
    }

    /// Grants of `file`, visible to its owner only.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    /// - `PermissionDenied` if `requester` does not own it
    pub fn grants_of(&self, file: FileId, requester: UserId) -> Result<Vec<ShareGrant>> {
        let record = self.complete_file(file)?;
        if record.owner != requester {
            return Err(Error::PermissionDenied(
                "Only the owner can list shares of this file".to_string(),
            ));
        }
        self.records.grants_of_file(file)
    }

    fn complete_file(&self, file: FileId) -> Result<FileRecord> {
        self.records
            .get_file(file)?
            .filter(FileRecord::is_complete)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", file)))
    }
}
