//! In-memory storage
//!
//! Backs tests and embedded use. Supports failure injection per operation and
//! key prefix so ledger write/delete failures can be exercised.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::core::StorageError;
use crate::traits::Storage;

#[derive(Debug, Default)]
struct FailurePlan {
    get: Option<String>,
    put: Option<String>,
    delete: Option<String>,
    list: Option<String>,
}

fn should_fail(prefix: Option<&String>, key: &str) -> bool {
    prefix.is_some_and(|prefix| key.starts_with(prefix.as_str()))
}

/// Thread-safe in-memory [`Storage`]
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
    failures: Arc<Mutex<FailurePlan>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every `get` of a key starting with `prefix`
    pub fn fail_gets(&self, prefix: impl Into<String>) {
        self.failures.lock().get = Some(prefix.into());
    }

    /// Fail every `put` of a key starting with `prefix`
    pub fn fail_puts(&self, prefix: impl Into<String>) {
        self.failures.lock().put = Some(prefix.into());
    }

    /// Fail every `delete` of a key starting with `prefix`
    pub fn fail_deletes(&self, prefix: impl Into<String>) {
        self.failures.lock().delete = Some(prefix.into());
    }

    /// Fail every `list` of a prefix starting with `prefix`
    pub fn fail_lists(&self, prefix: impl Into<String>) {
        self.failures.lock().list = Some(prefix.into());
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        *self.failures.lock() = FailurePlan::default();
    }

    /// Keys currently stored under `prefix` (full keys)
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.data
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Insert raw bytes directly, bypassing failure injection
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.data.write().insert(key.into(), value.into());
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if should_fail(self.failures.lock().get.as_ref(), key) {
            return Err(StorageError::Read {
                key: key.to_owned(),
                reason: "injected failure".into(),
            });
        }
        Ok(self.data.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        if should_fail(self.failures.lock().put.as_ref(), key) {
            return Err(StorageError::Write {
                key: key.to_owned(),
                reason: "injected failure".into(),
            });
        }
        self.data.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if should_fail(self.failures.lock().delete.as_ref(), key) {
            return Err(StorageError::Delete {
                key: key.to_owned(),
                reason: "injected failure".into(),
            });
        }
        self.data.write().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        if should_fail(self.failures.lock().list.as_ref(), prefix) {
            return Err(StorageError::List {
                prefix: prefix.to_owned(),
                reason: "injected failure".into(),
            });
        }
        Ok(self
            .data
            .read()
            .keys()
            .filter_map(|key| key.strip_prefix(prefix))
            .map(str::to_owned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryStorage::new();
        storage.put("config/root", b"{}".to_vec()).await.unwrap();
        assert_eq!(storage.get("config/root").await.unwrap(), Some(b"{}".to_vec()));

        storage.delete("config/root").await.unwrap();
        assert_eq!(storage.get("config/root").await.unwrap(), None);
        storage.delete("config/root").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_is_relative_and_sorted() {
        let storage = MemoryStorage::new();
        storage.put("wal/b", vec![]).await.unwrap();
        storage.put("wal/a", vec![]).await.unwrap();
        storage.put("role/x", vec![]).await.unwrap();
        assert_eq!(storage.list("wal/").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failure_injection_by_prefix() {
        let storage = MemoryStorage::new();
        storage.fail_puts("wal/");
        assert!(storage.put("wal/1", vec![]).await.is_err());
        assert!(storage.put("role/1", vec![]).await.is_ok());

        storage.clear_failures();
        assert!(storage.put("wal/1", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let storage = MemoryStorage::new();
        let clone = storage.clone();
        clone.put("k", vec![1]).await.unwrap();
        assert_eq!(storage.keys_with_prefix(""), vec!["k"]);
    }
}
