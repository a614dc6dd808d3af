//! Persistence and lifecycle of the installation key.
//!
//! The key lives outside the record database, in a dotenv-style key-value
//! file. [`KeyManager`] loads it once, generating and persisting a fresh key
//! only when none exists. Check-and-create runs under a mutex in-process and
//! under an exclusive lock on a sibling `.lock` file across processes, so
//! concurrent first use never produces two different keys.

use fd_lock::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::keys::KeyMaterial;
use lockbox_common::{Error, Result};

/// Default entry name of the key in the key file and process environment.
pub const DEFAULT_KEY_NAME: &str = "LOCKBOX_ENCRYPTION_KEY";

/// Backing medium for the installation key.
pub trait KeyStore: Send + Sync {
    /// Load the persisted key, if one exists.
    ///
    /// # Errors
    /// - `KeyStore` if the medium cannot be read or holds a malformed key
    fn load(&self) -> Result<Option<KeyMaterial>>;

    /// Durably persist `key`.
    ///
    /// # Errors
    /// - `KeyStore` if the medium cannot be written
    fn store(&self, key: &KeyMaterial) -> Result<()>;

    /// Persist `key` unless a key already exists, returning the key that
    /// ends up persisted.
    ///
    /// The default implementation only serializes callers sharing one
    /// [`KeyManager`]. Stores reachable from several processes override it.
    ///
    /// # Errors
    /// - `KeyStore` if the medium cannot be read or written
    fn store_if_absent(&self, key: &KeyMaterial) -> Result<KeyMaterial> {
        if let Some(existing) = self.load()? {
            return Ok(existing);
        }
        self.store(key)?;
        Ok(key.clone())
    }

    /// Short human-readable description used in logs.
    fn describe(&self) -> String;
}

/// Key store backed by a `NAME=value` file.
///
/// A non-empty value for the same name in the process environment takes
/// precedence over the file. Other entries in the file are preserved when
/// the key is written.
pub struct EnvFileKeyStore {
    path: PathBuf,
    name: String,
}

impl EnvFileKeyStore {
    /// Create a store for `name` inside the file at `path`.
    pub fn new(path: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            name: name.into(),
        }
    }

    /// Path of the key file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key_store_error(&self, action: &str, e: std::io::Error) -> Error {
        Error::KeyStore(format!(
            "Failed to {} key file {}: {}",
            action,
            self.path.display(),
            e
        ))
    }

    /// Parse the value for `self.name` out of file contents.
    fn find_entry<'a>(&self, contents: &'a str) -> Option<&'a str> {
        contents.lines().find_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (name, value) = line.split_once('=')?;
            if name.trim() != self.name {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some(value)
        })
    }

    fn is_own_entry(&self, line: &str) -> bool {
        let line = line.trim();
        let line = line.strip_prefix("export ").unwrap_or(line);
        line.split_once('=')
            .map(|(name, _)| name.trim() == self.name)
            .unwrap_or(false)
    }

    /// Directory holding the key file, created if missing.
    fn ensure_parent(&self) -> Result<PathBuf> {
        match self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .map_err(|e| self.key_store_error("create directory for", e))?;
                Ok(parent.to_path_buf())
            }
            None => Ok(PathBuf::from(".")),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn open_lock_file(&self) -> Result<File> {
        self.ensure_parent()?;
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options
            .open(self.lock_path())
            .map_err(|e| self.key_store_error("open lock for", e))
    }
}

impl KeyStore for EnvFileKeyStore {
    fn load(&self) -> Result<Option<KeyMaterial>> {
        if let Ok(value) = std::env::var(&self.name) {
            let value = Zeroizing::new(value);
            if !value.trim().is_empty() {
                debug!(name = %self.name, "Using encryption key from process environment");
                return KeyMaterial::from_encoded(&value).map(Some);
            }
        }

        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => Zeroizing::new(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.key_store_error("read", e)),
        };

        match self.find_entry(&contents) {
            Some(value) if !value.is_empty() => KeyMaterial::from_encoded(value).map(Some),
            _ => Ok(None),
        }
    }

    fn store(&self, key: &KeyMaterial) -> Result<()> {
        let existing = match fs::read_to_string(&self.path) {
            Ok(contents) => Zeroizing::new(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Zeroizing::new(String::new()),
            Err(e) => return Err(self.key_store_error("read", e)),
        };

        let mut contents = Zeroizing::new(String::with_capacity(existing.len() + 64));
        for line in existing.lines().filter(|line| !self.is_own_entry(line)) {
            contents.push_str(line);
            contents.push('\n');
        }
        contents.push_str(&self.name);
        contents.push('=');
        contents.push_str(&key.to_encoded());
        contents.push('\n');

        // Unique name per writer; created with owner-only permissions and
        // removed on drop if never persisted.
        let dir = self.ensure_parent()?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| self.key_store_error("write", e))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| self.key_store_error("write", e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| self.key_store_error("write", e))?;
        tmp.persist(&self.path)
            .map_err(|e| self.key_store_error("replace", e.error))?;

        Ok(())
    }

    fn store_if_absent(&self, key: &KeyMaterial) -> Result<KeyMaterial> {
        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock.write().map_err(|e| self.key_store_error("lock", e))?;

        // Another process may have created the key while we waited.
        if let Some(existing) = self.load()? {
            debug!(store = %self.describe(), "Key created by another process");
            return Ok(existing);
        }
        self.store(key)?;
        Ok(key.clone())
    }

    fn describe(&self) -> String {
        format!("{} in {}", self.name, self.path.display())
    }
}

/// In-process key store, for tests and embedded use.
#[derive(Default)]
pub struct MemoryKeyStore {
    slot: Mutex<Option<Zeroizing<String>>>,
}

impl MemoryKeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Result<Option<KeyMaterial>> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| Error::KeyStore("Key store lock poisoned".to_string()))?;
        slot.as_deref()
            .map(|encoded| KeyMaterial::from_encoded(encoded))
            .transpose()
    }

    fn store(&self, key: &KeyMaterial) -> Result<()> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| Error::KeyStore("Key store lock poisoned".to_string()))?;
        *slot = Some(key.to_encoded());
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory key store".to_string()
    }
}

/// Owner of the installation key.
pub struct KeyManager<S: KeyStore> {
    store: S,
    cached: Mutex<Option<KeyMaterial>>,
}

impl<S: KeyStore> KeyManager<S> {
    /// Create a manager over `store`. Nothing is read until first use.
    pub fn new(store: S) -> Self {
        Self {
            store,
            cached: Mutex::new(None),
        }
    }

    /// Get the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Return the installation key, creating and persisting it if absent.
    ///
    /// # Postconditions
    /// - Every call on this manager returns the same key
    /// - A newly generated key is persisted before it is returned
    ///
    /// # Errors
    /// - `KeyStore` if the key cannot be loaded or persisted
    pub fn get_or_create_key(&self) -> Result<KeyMaterial> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| Error::KeyStore("Key manager lock poisoned".to_string()))?;

        if let Some(key) = cached.as_ref() {
            return Ok(key.clone());
        }

        let key = match self.store.load()? {
            Some(key) => {
                debug!(store = %self.store.describe(), "Loaded encryption key");
                key
            }
            None => {
                let generated = KeyMaterial::generate();
                let key = self.store.store_if_absent(&generated)?;
                if key == generated {
                    info!(store = %self.store.describe(), "Generated new encryption key");
                }
                key
            }
        };

        *cached = Some(key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn unique_name(tag: &str) -> String {
        let suffix = hex::encode(&KeyMaterial::generate().as_bytes()[..6]).to_uppercase();
        format!("LOCKBOX_TEST_KEY_{}_{}", tag, suffix)
    }

    #[test]
    fn test_generates_and_persists_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".env");
        let name = unique_name("PERSIST");

        let first = KeyManager::new(EnvFileKeyStore::new(&path, name.clone()))
            .get_or_create_key()
            .unwrap();
        assert!(path.exists());

        // A fresh manager (as after a restart) loads the same key.
        let second = KeyManager::new(EnvFileKeyStore::new(&path, name))
            .get_or_create_key()
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_repeated_calls_return_same_key() {
        let manager = KeyManager::new(MemoryKeyStore::new());
        let a = manager.get_or_create_key().unwrap();
        let b = manager.get_or_create_key().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_preserves_other_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".env");
        fs::write(&path, "# settings\nDEBUG=true\nOTHER=\"value\"\n").unwrap();
        let name = unique_name("PRESERVE");

        KeyManager::new(EnvFileKeyStore::new(&path, name.clone()))
            .get_or_create_key()
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("DEBUG=true"));
        assert!(contents.contains("OTHER=\"value\""));
        assert!(contents.contains(&format!("{}=", name)));
    }

    #[test]
    fn test_loads_quoted_value() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".env");
        let name = unique_name("QUOTED");
        let key = KeyMaterial::generate();
        fs::write(&path, format!("{}='{}'\n", name, key.to_encoded().as_str())).unwrap();

        let loaded = EnvFileKeyStore::new(&path, name).load().unwrap().unwrap();
        assert_eq!(loaded, key);
    }

    #[test]
    fn test_malformed_key_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".env");
        let name = unique_name("MALFORMED");
        fs::write(&path, format!("{}=short\n", name)).unwrap();

        let result = KeyManager::new(EnvFileKeyStore::new(&path, name)).get_or_create_key();
        assert!(matches!(result, Err(Error::KeyStore(_))));
    }

    #[test]
    fn test_unwritable_store_is_error() {
        let temp = TempDir::new().unwrap();
        // The key file path is an existing directory, so it can be neither
        // read as a file nor replaced.
        let path = temp.path().join("dir.env");
        fs::create_dir(&path).unwrap();

        let result =
            KeyManager::new(EnvFileKeyStore::new(&path, unique_name("UNWRITABLE"))).get_or_create_key();
        assert!(matches!(result, Err(Error::KeyStore(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".env");
        KeyManager::new(EnvFileKeyStore::new(&path, unique_name("MODE")))
            .get_or_create_key()
            .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_independent_managers_agree_on_first_key() {
        for round in 0..20 {
            let temp = TempDir::new().unwrap();
            let path = temp.path().join("data").join(".env");
            let name = unique_name(&format!("SHARED{}", round));
            let barrier = Arc::new(Barrier::new(2));

            // Separate managers stand in for separate processes.
            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let manager = KeyManager::new(EnvFileKeyStore::new(&path, name.clone()));
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        manager.get_or_create_key()
                    })
                })
                .collect();

            let keys: Vec<KeyMaterial> = handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect();
            assert_eq!(keys[0], keys[1]);

            let persisted = EnvFileKeyStore::new(&path, name).load().unwrap().unwrap();
            assert_eq!(persisted, keys[0]);

            let leftovers: Vec<_> = fs::read_dir(temp.path().join("data"))
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|n| n != ".env" && n != ".env.lock")
                .collect();
            assert!(leftovers.is_empty(), "stray files: {:?}", leftovers);
        }
    }

    #[test]
    fn test_concurrent_first_use_yields_one_key() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".env");
        let manager = Arc::new(KeyManager::new(EnvFileKeyStore::new(
            &path,
            unique_name("CONCURRENT"),
        )));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || manager.get_or_create_key().unwrap())
            })
            .collect();

        let keys: Vec<KeyMaterial> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));

        let persisted = manager.store().load().unwrap().unwrap();
        assert_eq!(persisted, keys[0]);
    }
}
