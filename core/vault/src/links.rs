//! One-time share links.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;
use tracing::{debug, info};

use lockbox_common::{Error, FileId, Result, UserId};
use lockbox_records::{FileRecord, LinkState, RecordStore, ShareLink};

/// Random bytes per link token.
pub const TOKEN_BYTES: usize = 32;

/// The only message a failed redemption ever reports.
pub const LINK_INVALID_MESSAGE: &str = "This link is no longer valid.";

/// Generate an unguessable link token (43 URL-safe characters).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Public access path for a token.
pub fn share_path(token: &str) -> String {
    format!("/file/share/{}/", token)
}

fn link_invalid() -> Error {
    Error::LinkInvalid(LINK_INVALID_MESSAGE.to_string())
}

/// Issues and redeems single-use, time-limited links.
pub struct LinkManager {
    records: Arc<RecordStore>,
    validity: Duration,
}

impl LinkManager {
    pub fn new(records: Arc<RecordStore>, validity: Duration) -> Self {
        Self { records, validity }
    }

    /// Validity window applied to new links.
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Create a link to `file`.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist or is incomplete
    /// - `PermissionDenied` if `requester` does not own the file
    pub fn generate(&self, file: FileId, requester: UserId) -> Result<ShareLink> {
        let record = self
            .records
            .get_file(file)?
            .filter(FileRecord::is_complete)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", file)))?;

        if record.owner != requester {
            return Err(Error::PermissionDenied(
                "Only the owner can create links for this file".to_string(),
            ));
        }

        let expires_at = Utc::now() + self.validity;
        let link = self.records.insert_link(file, &generate_token(), expires_at)?;

        info!(
            file_id = %file,
            link_id = link.id,
            expires_at = %link.expires_at,
            "Share link created"
        );
        Ok(link)
    }

    /// Redeem a link now, consuming it.
    pub fn redeem(&self, token: &str) -> Result<FileRecord> {
        self.redeem_at(token, Utc::now())
    }

    /// Redeem a link as of `now`.
    ///
    /// Succeeds at most once per token. Consumption is persisted before the
    /// file is returned.
    ///
    /// # Errors
    /// - `LinkInvalid` if the token is unknown, consumed or expired, or its
    ///   file is gone; the cause is not disclosed
    pub fn redeem_at(&self, token: &str, now: DateTime<Utc>) -> Result<FileRecord> {
        match self.records.consume_link(token, now)? {
            Some(record) => {
                info!(file_id = %record.id, "Share link redeemed");
                Ok(record)
            }
            None => {
                debug!("Share link rejected");
                Err(link_invalid())
            }
        }
    }

    /// Look at a link without consuming it.
    ///
    /// # Errors
    /// - `LinkInvalid` if the token is unknown
    pub fn inspect(&self, token: &str) -> Result<(ShareLink, LinkState)> {
        let link = self.records.find_link(token)?.ok_or_else(link_invalid)?;
        let state = link.state_at(Utc::now());
        Ok((link, state))
    }
}
