//! Common types used throughout Lockbox.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Identifier of a registered user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a stored file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub i64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FileId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(FileId)
            .map_err(|_| crate::Error::InvalidInput(format!("Invalid file id: {}", s)))
    }
}

/// Hex-encoded SHA-256 digest of a file's plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Length of the hex encoding (32 bytes).
    pub const HEX_LENGTH: usize = 64;

    /// Parse a hex digest.
    ///
    /// # Errors
    /// - Returns error if the value is not 64 hex characters
    pub fn from_hex(hex: impl Into<String>) -> crate::Result<Self> {
        let hex = hex.into().to_ascii_lowercase();
        if hex.len() != Self::HEX_LENGTH || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(crate::Error::InvalidInput(format!(
                "Content hash must be {} hex characters",
                Self::HEX_LENGTH
            )));
        }
        Ok(Self(hex))
    }

    /// Get the hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentHash {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::from_hex(value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A relative path inside the blob storage root.
///
/// Components are validated so a stored path can never escape the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoragePath {
    components: Vec<String>,
}

impl StoragePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    fn check_component(comp: &str) -> crate::Result<()> {
        if comp.is_empty() {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be empty".to_string(),
            ));
        }
        if comp.contains('/') || comp.contains('\\') || comp.contains('\0') {
            return Err(crate::Error::InvalidInput(
                "Path component cannot contain separators".to_string(),
            ));
        }
        if comp == "." || comp == ".." {
            return Err(crate::Error::InvalidInput(
                "Path component cannot be a relative reference".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty, contains a separator,
    ///   or is `.`/`..`
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            Self::check_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into StoragePath.
    ///
    /// Uses '/' as separator. Leading and trailing separators are ignored.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_start_matches('/').trim_end_matches('/');
        if path.is_empty() {
            return Ok(Self::root());
        }

        let components: Vec<String> = path.split('/').map(String::from).collect();
        Self::from_components(components)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the last component.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        Self::check_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Relative string form, e.g. `encrypted_files/abc_report.pdf`.
    pub fn to_string_path(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

/// Sensitive data wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Create new sensitive bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// Get a reference to the inner bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Get the length.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_file_id_parse() {
        assert_eq!("42".parse::<FileId>().unwrap(), FileId(42));
        assert!("abc".parse::<FileId>().is_err());
    }

    #[test]
    fn test_content_hash_validation() {
        let hex = "ab".repeat(32);
        let hash = ContentHash::from_hex(hex.clone()).unwrap();
        assert_eq!(hash.as_str(), hex);

        assert!(ContentHash::from_hex("abc").is_err());
        assert!(ContentHash::from_hex("zz".repeat(32)).is_err());
    }

    #[test]
    fn test_content_hash_normalizes_case() {
        let hash = ContentHash::from_hex("AB".repeat(32)).unwrap();
        assert_eq!(hash.as_str(), "ab".repeat(32));
    }

    #[test]
    fn test_serde_forms() {
        let json = serde_json::to_string(&FileId(7)).unwrap();
        assert_eq!(json, "7");

        let hex = "cd".repeat(32);
        let hash: ContentHash = serde_json::from_str(&format!("\"{}\"", hex)).unwrap();
        assert_eq!(hash.as_str(), hex);
        assert!(serde_json::from_str::<ContentHash>("\"not-a-hash\"").is_err());
    }

    #[test]
    fn test_storage_path_parse() {
        let path = StoragePath::parse("encrypted_files/abc_report.pdf").unwrap();
        assert_eq!(path.components(), &["encrypted_files", "abc_report.pdf"]);
        assert_eq!(path.to_string_path(), "encrypted_files/abc_report.pdf");
        assert_eq!(path.name(), Some("abc_report.pdf"));
    }

    #[test]
    fn test_storage_path_root() {
        let path = StoragePath::parse("/").unwrap();
        assert!(path.is_root());
        assert_eq!(path.name(), None);
    }

    #[test]
    fn test_storage_path_rejects_traversal() {
        assert!(StoragePath::parse("encrypted_files/../secrets").is_err());
        assert!(StoragePath::parse("./x").is_err());
        assert!(StoragePath::root().join("..").is_err());
        assert!(StoragePath::root().join("a\\b").is_err());
    }

    #[test]
    fn test_sensitive_bytes_debug_redacted() {
        let bytes = SensitiveBytes::new(b"secret".to_vec());
        let debug = format!("{:?}", bytes);
        assert!(!debug.contains("secret"));
        assert_eq!(bytes.len(), 6);
    }

    proptest! {
        #[test]
        fn prop_join_never_accepts_separators(prefix in "[a-z]{0,8}", suffix in "[a-z]{0,8}") {
            let child = format!("{}/{}", prefix, suffix);
            prop_assert!(StoragePath::root().join(&child).is_err());
        }
    }
}
