//! Authenticated encryption using XChaCha20-Poly1305.
//!
//! XChaCha20-Poly1305 provides both confidentiality and authenticity,
//! with a 24-byte nonce that is safe for random generation.
//!
//! Sealed format: `version || nonce || ciphertext || tag`. The version byte
//! is bound as associated data, so every byte of the output is covered by
//! the authentication tag.

use chacha20poly1305::{
    aead::{generic_array::GenericArray, Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};

use crate::keys::KeyMaterial;
use lockbox_common::{Error, Result, SensitiveBytes};

/// Current sealed-format version.
pub const FORMAT_VERSION: u8 = 0x01;

/// Size of the version header in bytes.
pub const HEADER_SIZE: usize = 1;

/// Nonce size for XChaCha20-Poly1305 (24 bytes).
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size (16 bytes).
pub const TAG_SIZE: usize = 16;

/// Total bytes added to a plaintext by [`encrypt`].
pub const OVERHEAD: usize = HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

/// Encrypt plaintext using XChaCha20-Poly1305.
///
/// # Postconditions
/// - Returns version || nonce || ciphertext || tag
/// - The nonce is randomly generated, so repeated calls yield different output
/// - The output length is plaintext length + [`OVERHEAD`]
///
/// # Errors
/// - Returns `Encryption` error if the cipher fails
pub fn encrypt(key: &KeyMaterial, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let header = [FORMAT_VERSION];

    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|e| Error::Encryption(format!("Encryption failed: {}", e)))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&header);
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// # Postconditions
/// - Returns the original plaintext, zeroized when dropped
/// - Verifies the authentication tag before returning anything
///
/// # Errors
/// - Returns `Authentication` error if the input is truncated, carries an
///   unknown version, was modified, or was sealed under a different key
pub fn decrypt(key: &KeyMaterial, sealed: &[u8]) -> Result<SensitiveBytes> {
    if sealed.len() < OVERHEAD {
        return Err(Error::Authentication("Ciphertext too short".to_string()));
    }

    let (header, rest) = sealed.split_at(HEADER_SIZE);
    if header[0] != FORMAT_VERSION {
        return Err(Error::Authentication(format!(
            "Unsupported ciphertext version: {:#04x}",
            header[0]
        )));
    }

    let (nonce_bytes, encrypted) = rest.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new(GenericArray::from_slice(key.as_bytes()));

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: encrypted,
                aad: header,
            },
        )
        .map(SensitiveBytes::new)
        .map_err(|_| Error::Authentication("Ciphertext failed authentication".to_string()))
}
