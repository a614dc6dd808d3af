//! Cryptographic primitives for Lockbox.
//!
//! This module provides:
//! - The installation key and its persistence (`KeyManager`)
//! - Authenticated encryption using XChaCha20-Poly1305
//! - SHA-256 content hashing for post-decryption integrity checks
//! - Whole-file encryption combining the two (`envelope`)
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - Decrypted plaintext is held in zeroizing buffers
//! - No plaintext or key material is ever logged
//! - Constant-time comparison of keys and content hashes

pub mod aead;
pub mod envelope;
pub mod hash;
pub mod keys;
pub mod keystore;

pub use envelope::{decrypt_file, decrypt_verified, encrypt_file, verify_content, EncryptedFile};
pub use hash::{content_hash, hashes_match};
pub use keys::{KeyMaterial, KEY_LENGTH};
pub use keystore::{EnvFileKeyStore, KeyManager, KeyStore, MemoryKeyStore, DEFAULT_KEY_NAME};
