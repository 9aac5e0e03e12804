//! Key/value storage collaborator

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::core::StorageError;

/// Durable key/value storage
///
/// Holds configuration (`config/*`), roles (`role/*`) and the rollback ledger
/// (`wal/*`). Writes must be durable when `put` returns: the ledger relies on
/// an entry existing before the first IAM mutation is attempted.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a key; `Ok(None)` when absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a key, replacing any existing value
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Delete a key; deleting an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List keys under `prefix`, returned relative to the prefix and sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Read and decode a JSON record
pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(bytes) = storage.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Decode {
            key: key.to_owned(),
            source,
        })
}

/// Encode and write a JSON record
pub async fn put_json<T: Serialize + Sync>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Encode {
        key: key.to_owned(),
        source,
    })?;
    storage.put(key, bytes).await
}
