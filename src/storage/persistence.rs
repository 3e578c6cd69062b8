//! StateStore trait: pluggable key-value backend for persisted service state
//!
//! - `SledStateStore`: durable on-disk store used by the binary
//! - `InMemoryStateStore`: volatile store for tests and `--simulate` runs

use std::collections::HashMap;

/// Key-value store holding one JSON document per key.
///
/// Implementations must be thread-safe (Send + Sync) for shared access
/// across async tasks.
pub trait StateStore: Send + Sync {
    /// Fetch the JSON value under `key`, `None` when absent
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    /// Insert or overwrite the value under `key`
    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError>;

    /// Remove `key`; removing an absent key is not an error
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// In-memory store. Not durable; data is lost on restart.
pub struct InMemoryStateStore {
    entries: std::sync::RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            entries: std::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        entries.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "InMemory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_in_memory_set_get_delete() {
        let store = InMemoryStateStore::new();
        assert!(store.get("missing").unwrap().is_none());

        store.set("k", &json!({"enabled": true})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"enabled": true})));
        assert_eq!(store.len(), 1);

        store.delete("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        // Deleting twice is fine
        store.delete("k").unwrap();
    }

    #[test]
    fn test_trait_object() {
        let store: Box<dyn StateStore> = Box::new(InMemoryStateStore::new());
        assert_eq!(store.backend_name(), "InMemory");
        store.set("a", &json!(1)).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(json!(1)));
    }
}
