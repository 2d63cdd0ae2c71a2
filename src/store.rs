//! Durable key-value storage used for the persisted queue and error log.
//!
//! The core only needs synchronous `get`/`set`/`remove` by string key. A missing key
//! and a key whose content cannot be read are indistinguishable to callers: both
//! come back as `None`.
//!
//! # Examples
//!
//! ```rust
//! use breakwater::store::{KeyValueStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store.set("greeting", "hello").unwrap();
//! assert_eq!(store.get("greeting"), Some("hello".to_string()));
//!
//! store.remove("greeting").unwrap();
//! assert_eq!(store.get("greeting"), None);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Failure writing to or removing from a [`KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium rejected the write.
    #[error("failed to write key `{key}`: {source}")]
    Write {
        /// Key being written.
        key: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The backing medium rejected the removal.
    #[error("failed to remove key `{key}`: {source}")]
    Remove {
        /// Key being removed.
        key: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A value could not be serialized before storing it.
    #[error("failed to encode value for key `{key}`: {source}")]
    Encode {
        /// Key being written.
        key: String,
        /// Underlying serializer failure.
        #[source]
        source: serde_json::Error,
    },
}

/// Synchronous durable key-value storage.
///
/// Implementations must return `None` from [`get`](KeyValueStore::get) for keys that
/// are absent *or* unreadable.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Read and deserialize a JSON value, treating any decode failure as absent.
pub(crate) fn load_json<T>(store: &dyn KeyValueStore, key: &str) -> Option<T>
where
    T: serde::de::DeserializeOwned,
{
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(key, error = %err, "discarding unreadable persisted state");
            None
        }
    }
}

/// Serialize `value` as JSON and store it under `key`.
pub(crate) fn save_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StoreError>
where
    T: serde::Serialize + ?Sized,
{
    let encoded = serde_json::to_string(value).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &encoded)
}

/// Process-local store, lost on restart. Useful for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Store that keeps one file per key inside a directory.
///
/// Keys are sanitized into file names; anything outside `[A-Za-z0-9_-]` becomes `_`.
/// Writes go to a temporary sibling first and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the stored files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let write = |source| StoreError::Write {
            key: key.to_string(),
            source,
        };
        std::fs::write(&tmp, value).map_err(write)?;
        std::fs::rename(&tmp, &path).map_err(write)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Remove {
                key: key.to_string(),
                source,
            }),
        }
    }
}
