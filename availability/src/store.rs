//! The persistent store keeps cache maps across restarts as serialized strings.
//! Writes are best effort: callers log and drop store errors.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
}

pub trait Store: Send + Sync {
    /// Returns `None` when nothing has been stored under `key`.
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn save(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// Store that never holds anything, every read is a miss.
pub struct NoopStore;

impl Store for NoopStore {
    fn load(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }

    fn save(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// One `<key>.json` file per key under `base_dir`.
pub struct FilesystemStore {
    base_dir: PathBuf,
}

impl FilesystemStore {
    pub fn new(base_dir: &str) -> Self {
        FilesystemStore {
            base_dir: PathBuf::from(base_dir),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(Path::new(&self.base_dir).join(format!("{key}.json")))
    }
}

impl Store for FilesystemStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(Some(contents))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.base_dir)?;

        // Create or overwrite file
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(value.as_bytes())?;
        writer.flush()?;

        tracing::trace!(path = ?path, bytes = value.len(), "stored cache map");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.load("k").unwrap(), None);
        store.save("k", "{}").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn test_noop_store() {
        let store = NoopStore;
        store.save("k", "{}").unwrap();
        assert_eq!(store.load("k").unwrap(), None);
    }

    #[test]
    fn test_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_str().unwrap());

        assert_eq!(store.load("akayuki_status_cache_v5").unwrap(), None);
        store
            .save("akayuki_status_cache_v5", r#"{"1535":{"v":true,"e":10}}"#)
            .unwrap();
        assert_eq!(
            store.load("akayuki_status_cache_v5").unwrap().as_deref(),
            Some(r#"{"1535":{"v":true,"e":10}}"#)
        );

        // A second store over the same directory sees the data
        let reopened = FilesystemStore::new(dir.path().to_str().unwrap());
        assert!(reopened.load("akayuki_status_cache_v5").unwrap().is_some());
    }

    #[test]
    fn test_filesystem_creates_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let store = FilesystemStore::new(nested.to_str().unwrap());
        store.save("key", "1").unwrap();
        assert_eq!(store.load("key").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_filesystem_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path().to_str().unwrap());
        assert!(matches!(
            store.save("../escape", "x"),
            Err(StoreError::InvalidKey(_))
        ));
    }
}
