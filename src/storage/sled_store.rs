//! Sled-backed state store
//!
//! Keys are stored as UTF-8 bytes, values as JSON. Each write is followed by
//! a flush so a crash loses at most the write in progress.

use std::path::Path;
use std::sync::Arc;

use super::persistence::{StateStore, StorageError};

#[derive(Clone)]
pub struct SledStateStore {
    db: Arc<sled::Db>,
}

impl SledStateStore {
    /// Open or create the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;

        tracing::info!("State store opened at {:?}", path_ref);

        Ok(Self { db: Arc::new(db) })
    }

    /// Number of stored keys
    pub fn count(&self) -> usize {
        self.db.len()
    }
}

impl StateStore for SledStateStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key.as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "Sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_open() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStateStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_set_and_get_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        {
            let store = SledStateStore::open(temp_dir.path()).unwrap();
            store
                .set("orchestrator:service:redis:state", &json!({"restart_count": 2}))
                .unwrap();
        }

        let store = SledStateStore::open(temp_dir.path()).unwrap();
        let value = store.get("orchestrator:service:redis:state").unwrap();
        assert_eq!(value, Some(json!({"restart_count": 2})));
    }

    #[test]
    fn test_corrupt_value_is_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStateStore::open(temp_dir.path()).unwrap();
        store.db.insert("bad", &b"{not json"[..]).unwrap();

        assert!(matches!(
            store.get("bad"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SledStateStore::open(temp_dir.path()).unwrap();
        store.set("k", &json!(true)).unwrap();
        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        assert_eq!(store.count(), 0);
    }
}
