//! Ciphertext blob storage for Lockbox.
//!
//! This module provides a trait-based interface for storing encrypted file
//! blobs under a configured root, with a local filesystem backend and an
//! in-memory backend for tests.
//!
//! # Design Principles
//! - Storage only ever sees ciphertext; encryption happens in the vault layer
//! - Async operations: All I/O operations are async
//! - Unified error semantics: Consistent error types across backends

pub mod local;
pub mod memory;
pub mod provider;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;
pub use provider::{BlobMetadata, BlobStore};
