//! Service configuration.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use lockbox_common::{Error, Result, StoragePath};
use lockbox_crypto::DEFAULT_KEY_NAME;

/// Default record database file name, relative to the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "lockbox.db";

/// Default blob directory, relative to the data directory.
pub const DEFAULT_BLOB_DIR: &str = "encrypted_files";

/// Default key file name, relative to the data directory.
pub const DEFAULT_KEY_FILE: &str = ".env";

/// Default link validity window.
pub const DEFAULT_LINK_VALIDITY_HOURS: u32 = 24;

/// Default age after which an incomplete upload counts as abandoned.
pub const DEFAULT_INCOMPLETE_GRACE_MINUTES: u32 = 60;

/// Default upload size limit (64 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration for a [`VaultService`](crate::VaultService).
///
/// Every field has a default, so a partial JSON document is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Root of all persisted state.
    pub data_dir: PathBuf,
    /// SQLite database file, relative to `data_dir` unless absolute.
    pub database_file: PathBuf,
    /// Blob directory below `data_dir` holding ciphertext.
    pub blob_dir: String,
    /// Key file; defaults to `.env` inside `data_dir`.
    pub key_file: Option<PathBuf>,
    /// Entry name of the key in the key file and the environment.
    pub key_name: String,
    /// How long a share link stays redeemable.
    pub link_validity_hours: u32,
    /// Largest accepted upload in bytes.
    pub max_file_size: u64,
    /// Accepted filename extensions, lowercase without the dot. Empty
    /// accepts every extension.
    pub allowed_extensions: Vec<String>,
    /// Require a `download` grant (not just `view`) to download.
    pub strict_permissions: bool,
    /// Directory for decrypted temporary files; system default if unset.
    pub temp_dir: Option<PathBuf>,
    /// Minutes an incomplete upload is left alone before a sweep removes
    /// it. Another process may still be writing it.
    pub incomplete_grace_minutes: u32,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("lockbox-data"),
            database_file: PathBuf::from(DEFAULT_DATABASE_FILE),
            blob_dir: DEFAULT_BLOB_DIR.to_string(),
            key_file: None,
            key_name: DEFAULT_KEY_NAME.to_string(),
            link_validity_hours: DEFAULT_LINK_VALIDITY_HOURS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: ["txt", "pdf", "docx", "jpg", "png", "zip"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            strict_permissions: false,
            temp_dir: None,
            incomplete_grace_minutes: DEFAULT_INCOMPLETE_GRACE_MINUTES,
        }
    }
}

impl VaultConfig {
    /// Default configuration rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load and validate a configuration file.
    ///
    /// # Errors
    /// - `Config` if the file is unreadable, malformed or invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check that the configuration is usable.
    ///
    /// # Errors
    /// - `Config` describing the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.link_validity_hours == 0 {
            return Err(Error::Config(
                "link_validity_hours must be positive".to_string(),
            ));
        }
        if self.max_file_size == 0 {
            return Err(Error::Config("max_file_size must be positive".to_string()));
        }
        if self.database_file.as_os_str().is_empty() {
            return Err(Error::Config("database_file must not be empty".to_string()));
        }
        if self.key_name.is_empty()
            || self
                .key_name
                .chars()
                .any(|c| c == '=' || c == '#' || c.is_whitespace())
        {
            return Err(Error::Config(format!(
                "Invalid key_name '{}'",
                self.key_name
            )));
        }
        let blob_dir = self.blob_dir_path()?;
        if blob_dir.is_root() {
            return Err(Error::Config("blob_dir must not be empty".to_string()));
        }
        if let Some(ext) = self
            .allowed_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.contains('.') || ext.to_lowercase() != **ext)
        {
            return Err(Error::Config(format!(
                "Allowed extensions must be lowercase without a dot, got '{}'",
                ext
            )));
        }
        Ok(())
    }

    /// Full path of the record database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Full path of the key file.
    pub fn key_file_path(&self) -> PathBuf {
        self.key_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join(DEFAULT_KEY_FILE))
    }

    /// Blob directory as a storage path.
    pub fn blob_dir_path(&self) -> Result<StoragePath> {
        StoragePath::parse(&self.blob_dir)
            .map_err(|e| Error::Config(format!("Invalid blob_dir: {}", e)))
    }

    /// Link validity as a duration.
    pub fn link_validity(&self) -> Duration {
        Duration::hours(i64::from(self.link_validity_hours))
    }

    /// Grace period for incomplete uploads as a duration.
    pub fn incomplete_grace(&self) -> Duration {
        Duration::minutes(i64::from(self.incomplete_grace_minutes))
    }

    /// Whether `filename` carries an accepted extension.
    pub fn extension_allowed(&self, filename: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        match Path::new(filename).extension().and_then(|ext| ext.to_str()) {
            Some(ext) => {
                let ext = ext.to_lowercase();
                self.allowed_extensions.iter().any(|allowed| *allowed == ext)
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = VaultConfig::with_data_dir("/srv/lockbox");

        assert!(config.validate().is_ok());
        assert_eq!(config.database_path(), PathBuf::from("/srv/lockbox/lockbox.db"));
        assert_eq!(config.key_file_path(), PathBuf::from("/srv/lockbox/.env"));
        assert_eq!(config.link_validity(), Duration::hours(24));
        assert_eq!(config.incomplete_grace(), Duration::minutes(60));
        assert_eq!(config.blob_dir_path().unwrap().to_string_path(), "encrypted_files");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = VaultConfig::from_json(
            r#"{"data_dir": "/tmp/lb", "link_validity_hours": 2, "strict_permissions": true}"#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/lb"));
        assert_eq!(config.link_validity_hours, 2);
        assert!(config.strict_permissions);
        assert_eq!(config.key_name, DEFAULT_KEY_NAME);
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = VaultConfig::with_data_dir("/data");
        config.allowed_extensions.clear();
        config.temp_dir = Some(PathBuf::from("/scratch"));

        let restored = VaultConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lockbox.json");
        std::fs::write(&path, r#"{"link_validity_hours": 0}"#).unwrap();

        assert!(matches!(VaultConfig::load(&path), Err(Error::Config(_))));
        assert!(matches!(
            VaultConfig::load(temp.path().join("missing.json")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_fields() {
        let mut config = VaultConfig::default();
        config.key_name = "BAD NAME".to_string();
        assert!(config.validate().is_err());

        let mut config = VaultConfig::default();
        config.blob_dir = "../escape".to_string();
        assert!(config.validate().is_err());

        let mut config = VaultConfig::default();
        config.allowed_extensions = vec![".pdf".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extension_allowed() {
        let mut config = VaultConfig::default();

        assert!(config.extension_allowed("report.pdf"));
        assert!(config.extension_allowed("PHOTO.JPG"));
        assert!(!config.extension_allowed("script.sh"));
        assert!(!config.extension_allowed("README"));

        config.allowed_extensions.clear();
        assert!(config.extension_allowed("README"));
    }
}
