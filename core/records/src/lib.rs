//! Relational record store for Lockbox.
//!
//! Persists users, file records, direct share grants and one-time share
//! links in SQLite. The store owns the atomic link-consumption transition;
//! the policy built on top of these records lives in `lockbox-vault`.

pub mod db;
pub mod files;
pub mod links;
pub mod shares;
pub mod users;

pub use db::RecordStore;
pub use files::FileRecord;
pub use links::{LinkState, ShareLink};
pub use shares::{NewShareGrant, Permission, ShareGrant};
pub use users::User;
