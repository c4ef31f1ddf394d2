//! Token storage
//!
//! A dumb container for the bearer token, the role tag and the optional
//! refresh token. The three values live in ONE JSON record under a single
//! storage key, so every write replaces them together and a reader can never
//! observe a token without its role.
//!
//! The backing area is any [`KeyValueStorage`]: [`MemoryStorage`] for tests and
//! short-lived processes, [`FileStorage`] for a persistent, origin-scoped area
//! that survives restarts.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

/// Storage key holding the serialized session record
const STORAGE_KEY_SESSION: &str = "sgcd_pm_session";

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Synchronous key/value area, modelled on the browser `Storage` interface.
pub trait KeyValueStorage: Send + Sync {
    /// Read a value, `None` when the key is absent
    fn get_item(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove a key. Removing an absent key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Process-local storage. Contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// ============================================================================
// File-backed storage
// ============================================================================

/// Persistent storage backed by a JSON file.
///
/// The whole map is rewritten on every mutation through a temporary file and
/// a rename, so a crash mid-write leaves either the old or the new contents.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open (or lazily create) the storage file at `path`.
    ///
    /// A missing file starts empty. An unreadable or corrupt file is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => HashMap::new(),
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Open the storage area scoped to `origin` inside `dir`.
    ///
    /// Each origin (scheme, host and port of the API) gets its own file, so
    /// sessions against different backends never share credentials.
    pub fn for_origin(dir: impl AsRef<Path>, origin: &str) -> Result<Self, StorageError> {
        Self::open(dir.as_ref().join(origin_file_name(origin)))
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Keep memory consistent with what is on disk
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = lock(&self.entries);
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&entries) {
            entries.insert(key.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }
}

/// Turn an origin such as `http://localhost:8090` into `http_localhost_8090.json`
fn origin_file_name(origin: &str) -> String {
    let mut name: String = origin
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    while name.contains("__") {
        name = name.replace("__", "_");
    }
    format!("{}.json", name.trim_matches('_'))
}

// ============================================================================
// Token store
// ============================================================================

/// The persisted session record
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub token: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredSession")
            .field("token", &"<redacted>")
            .field("role", &self.role)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Token store over a shared key/value area
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStorage>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>) -> Self {
        Self { storage }
    }

    /// Store backed by a fresh [`MemoryStorage`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Store a token and its role, dropping any refresh token
    pub fn set(&self, token: &str, role: &str) -> Result<(), StorageError> {
        self.set_session(&StoredSession {
            token: token.to_string(),
            role: role.to_string(),
            refresh_token: None,
        })
    }

    /// Replace the whole session record in one write
    pub fn set_session(&self, session: &StoredSession) -> Result<(), StorageError> {
        let json = serde_json::to_string(session)?;
        self.storage.set_item(STORAGE_KEY_SESSION, &json)
    }

    /// Current session record. A corrupt record reads as absent.
    pub fn session(&self) -> Option<StoredSession> {
        let json = self.storage.get_item(STORAGE_KEY_SESSION)?;
        serde_json::from_str(&json).ok()
    }

    pub fn get(&self) -> Option<String> {
        self.session().map(|s| s.token)
    }

    pub fn get_role(&self) -> Option<String> {
        self.session().map(|s| s.role)
    }

    pub fn get_refresh_token(&self) -> Option<String> {
        self.session().and_then(|s| s.refresh_token)
    }

    /// Remove token, role and refresh token together
    pub fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove_item(STORAGE_KEY_SESSION)
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_session", &self.session().is_some())
            .finish()
    }
}
