use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage file {} is not a JSON object: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage lock poisoned")]
    Poisoned,
}

/// Opaque persistent key-value storage shared by every surface.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Key-value store backed by one pretty-printed JSON object on disk.
///
/// Every read goes back to the file so separate instances pointed at the same
/// path observe each other's writes. Writes merge into the current on-disk
/// object instead of replacing it.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_for_update(&self) -> Result<Map<String, Value>, StorageError> {
        match read_json_object(&self.path) {
            Ok(payload) => Ok(payload.unwrap_or_default()),
            Err(StorageError::Json { path, source }) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %source,
                    "discarding unreadable storage file"
                );
                Ok(Map::new())
            }
            Err(err) => Err(err),
        }
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let payload = read_json_object(&self.path)?;
        Ok(payload.and_then(|payload| payload.get(key).cloned()))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut on_disk = self.load_for_update()?;
        if on_disk.get(key) == Some(&value) {
            return Ok(());
        }
        on_disk.insert(key.to_string(), value);
        write_json_object(&self.path, &on_disk)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::Poisoned)?;
        let mut on_disk = self.load_for_update()?;
        if on_disk.remove(key).is_none() {
            return Ok(());
        }
        write_json_object(&self.path, &on_disk)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    payload: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let payload = self.payload.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(payload.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut payload = self.payload.lock().map_err(|_| StorageError::Poisoned)?;
        payload.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut payload = self.payload.lock().map_err(|_| StorageError::Poisoned)?;
        payload.remove(key);
        Ok(())
    }
}

fn read_json_object(path: &Path) -> Result<Option<Map<String, Value>>, StorageError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let parsed: Map<String, Value> =
        serde_json::from_str(&raw).map_err(|source| StorageError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Some(parsed))
}

fn write_json_object(path: &Path, payload: &Map<String, Value>) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let body = serde_json::to_string_pretty(payload).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, body).map_err(io_err)
}
