//! Whole-file encryption with plaintext integrity hashing.
//!
//! Encryption returns the sealed bytes together with the SHA-256 hash of the
//! plaintext. The hash is recorded next to the file and checked again after
//! decryption, which separates two failure classes:
//! - the ciphertext does not authenticate (`Error::Authentication`)
//! - the ciphertext authenticates but the content differs from what was
//!   uploaded (`Error::HashMismatch`)
//!
//! Files are processed as single in-memory buffers.

use tracing::debug;

use crate::aead;
use crate::hash::{content_hash, hashes_match};
use crate::keys::KeyMaterial;
use lockbox_common::{ContentHash, Error, Result, SensitiveBytes};

/// Output of [`encrypt_file`].
#[derive(Debug, Clone)]
pub struct EncryptedFile {
    /// Sealed bytes, safe to write to blob storage.
    pub ciphertext: Vec<u8>,
    /// SHA-256 of the plaintext.
    pub content_hash: ContentHash,
}

/// Encrypt a file's contents and hash its plaintext.
///
/// # Postconditions
/// - `ciphertext` decrypts back to `plaintext` under `key`
/// - `content_hash` is the SHA-256 of `plaintext`
/// - Output is not deterministic; callers must not compare ciphertexts
pub fn encrypt_file(key: &KeyMaterial, plaintext: &[u8]) -> Result<EncryptedFile> {
    let content_hash = content_hash(plaintext)?;
    let ciphertext = aead::encrypt(key, plaintext)?;

    debug!(
        plaintext_len = plaintext.len(),
        ciphertext_len = ciphertext.len(),
        "Encrypted file contents"
    );

    Ok(EncryptedFile {
        ciphertext,
        content_hash,
    })
}

/// Decrypt a file's contents.
///
/// # Errors
/// - `Authentication` if the ciphertext was modified or the key is wrong
pub fn decrypt_file(key: &KeyMaterial, ciphertext: &[u8]) -> Result<SensitiveBytes> {
    aead::decrypt(key, ciphertext)
}

/// Recompute the plaintext hash and compare it to the recorded one.
///
/// # Errors
/// - `HashMismatch` if the digests differ
pub fn verify_content(plaintext: &[u8], expected: &ContentHash) -> Result<()> {
    let actual = content_hash(plaintext)?;
    if !hashes_match(&actual, expected) {
        return Err(Error::HashMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Decrypt and verify in one step.
///
/// The plaintext is only returned when both the authentication tag and the
/// recorded hash check out. On a hash mismatch the decrypted buffer is
/// dropped (and zeroized) before the error is returned.
pub fn decrypt_verified(
    key: &KeyMaterial,
    ciphertext: &[u8],
    expected: &ContentHash,
) -> Result<SensitiveBytes> {
    let plaintext = decrypt_file(key, ciphertext)?;
    verify_content(plaintext.as_bytes(), expected)?;
    Ok(plaintext)
}
