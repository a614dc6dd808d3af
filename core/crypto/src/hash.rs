//! SHA-256 content hashing.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use lockbox_common::{ContentHash, Result};

/// Compute the SHA-256 digest of `data` as a [`ContentHash`].
pub fn content_hash(data: &[u8]) -> Result<ContentHash> {
    let digest = Sha256::digest(data);
    ContentHash::from_hex(hex::encode(digest))
}

/// Compare two hashes in constant time.
pub fn hashes_match(a: &ContentHash, b: &ContentHash) -> bool {
    a.as_str().as_bytes().ct_eq(b.as_str().as_bytes()).into()
}
