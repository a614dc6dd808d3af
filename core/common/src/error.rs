//! Common error types for Lockbox.

use thiserror::Error;

/// Top-level error type for Lockbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The key store could not be read or written, or holds malformed key material.
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// Encryption could not be performed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Ciphertext failed authentication (tampered, truncated, or wrong key).
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Decryption succeeded but the plaintext does not match the recorded hash.
    #[error("Content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Share link is unknown, expired, or already used.
    #[error("Invalid link: {0}")]
    LinkInvalid(String),

    /// A user attempted to share a file with themselves.
    #[error("Cannot share a file with yourself")]
    SelfShare,

    /// Requester lacks access to the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Blob storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means stored content cannot be trusted.
    ///
    /// Covers both authentication failures and post-decryption hash
    /// mismatches. Content must never be served when this returns true.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Error::Authentication(_) | Error::HashMismatch { .. })
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
