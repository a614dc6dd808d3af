//! Vault service for Lockbox.
//!
//! This module provides:
//! - Encrypted upload with two-phase record creation and rollback
//! - Verified download into self-deleting temporary files
//! - Per-user sharing with ordered permissions
//! - Single-use, time-limited share links
//!
//! # Architecture
//! [`VaultService`] owns the installation key and sits between callers and
//! the record and blob stores, encrypting and verifying transparently.

pub mod config;
pub mod download;
pub mod links;
pub mod service;
pub mod shares;

pub use config::VaultConfig;
pub use download::DecryptedFile;
pub use links::{generate_token, share_path, LinkManager, LINK_INVALID_MESSAGE};
pub use service::{FileListing, SharedFile, VaultService};
pub use shares::{GrantOptions, GrantOutcome, ShareManager};

pub use lockbox_records::{FileRecord, LinkState, Permission, ShareGrant, ShareLink, User};
