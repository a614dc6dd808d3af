//! Key types with secure memory handling.
//!
//! Key material automatically zeroizes its memory on drop to prevent
//! sensitive data from persisting in memory.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use lockbox_common::{Error, Result};

/// Length of encryption keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// The installation-wide symmetric key.
///
/// One key encrypts every file stored by an installation. It is created
/// once, persisted by a [`KeyStore`](crate::keystore::KeyStore), and passed
/// explicitly to every encrypt/decrypt call.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; KEY_LENGTH],
}

impl KeyMaterial {
    /// Create key material from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Generate a random key from the operating system CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Encode as URL-safe base64 for storage in a key-value file.
    pub fn to_encoded(&self) -> Zeroizing<String> {
        Zeroizing::new(URL_SAFE.encode(self.key))
    }

    /// Decode key material previously produced by [`KeyMaterial::to_encoded`].
    ///
    /// # Errors
    /// - Returns `KeyStore` error if the value is not valid base64 or has
    ///   the wrong length
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            URL_SAFE
                .decode(encoded.trim())
                .map_err(|_| Error::KeyStore("Stored key is not valid base64".to_string()))?,
        );

        if decoded.len() != KEY_LENGTH {
            return Err(Error::KeyStore(format!(
                "Stored key has invalid length: expected {}, got {}",
                KEY_LENGTH,
                decoded.len()
            )));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        use subtle::ConstantTimeEq;
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for KeyMaterial {}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_random() {
        let key1 = KeyMaterial::generate();
        let key2 = KeyMaterial::generate();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_encoded_roundtrip() {
        let key = KeyMaterial::generate();
        let encoded = key.to_encoded();
        let decoded = KeyMaterial::from_encoded(&encoded).unwrap();

        assert_eq!(key, decoded);
    }

    #[test]
    fn test_from_encoded_rejects_wrong_length() {
        let short = URL_SAFE.encode([7u8; 16]);
        let result = KeyMaterial::from_encoded(&short);
        assert!(matches!(result, Err(Error::KeyStore(_))));
    }

    #[test]
    fn test_from_encoded_rejects_garbage() {
        let result = KeyMaterial::from_encoded("not base64 at all!");
        assert!(matches!(result, Err(Error::KeyStore(_))));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = KeyMaterial::from_bytes([0xAB; KEY_LENGTH]);
        let debug = format!("{:?}", key);
        assert_eq!(debug, "KeyMaterial([REDACTED])");
    }
}
