//! Rollback ledger (write-ahead log)
//!
//! Every IAM user the broker creates is announced in the ledger before the
//! first mutating IAM call and removed from it only once the user is fully
//! provisioned. Anything still in the ledger after the grace window is an
//! orphan from a failed or interrupted issuance, and [`WriteAheadLog::sweep`]
//! deletes it.
//!
//! Entries live under [`WAL_PREFIX`] in the storage collaborator:
//!
//! ```text
//! wal/6f9619ff-8b86-d011-b42d-00cf4fc964ff
//!   {"id":"6f96...","kind":"user","username":"nebula-alice-ro-...","created_at":"2024-..."}
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{CredentialError, Result, StorageError, WalId};
use crate::rollback;
use crate::traits::{IdentityProvider, Storage, get_json, put_json};

/// Reserved storage prefix for ledger entries
pub const WAL_PREFIX: &str = "wal/";

/// Kind tag of entries covering an IAM user
pub const USER_ENTRY_KIND: &str = "user";

/// A pending IAM user creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Ledger ID
    pub id: WalId,
    /// Entry kind; only `user` is produced
    pub kind: String,
    /// IAM user name
    pub username: String,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

impl WalEntry {
    /// Entry for a user about to be created
    pub fn user(username: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: WalId::new(),
            kind: USER_ENTRY_KIND.to_owned(),
            username: username.into(),
            created_at,
        }
    }

    /// Time since the entry was written (zero if in the future)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Entry the sweep could not resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepFailure {
    /// Storage key relative to [`WAL_PREFIX`]
    pub key: String,
    /// Why it was left in place
    pub reason: String,
}

/// Outcome of one sweep pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Usernames deleted and whose entries were removed
    pub rolled_back: Vec<String>,
    /// Entries still inside the grace window
    pub pending: Vec<WalId>,
    /// Entries left for the next pass
    pub failed: Vec<SweepFailure>,
}

impl SweepReport {
    /// Whether every expired entry was resolved
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Ledger over the storage collaborator
#[derive(Clone)]
pub struct WriteAheadLog {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog").finish_non_exhaustive()
    }
}

impl WriteAheadLog {
    /// Create a ledger over `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Storage key of an entry
    pub fn key(id: WalId) -> String {
        format!("{WAL_PREFIX}{id}")
    }

    /// Durably record that `username` is about to be created
    #[tracing::instrument(level = "debug", skip(self, now))]
    pub async fn begin(&self, username: &str, now: DateTime<Utc>) -> Result<WalId> {
        let entry = WalEntry::user(username, now);
        put_json(self.storage.as_ref(), &Self::key(entry.id), &entry)
            .await
            .map_err(|source| CredentialError::LedgerWrite {
                username: username.to_owned(),
                source,
            })?;
        tracing::debug!(wal_id = %entry.id, "WAL entry written");
        Ok(entry.id)
    }

    /// Remove an entry once its user is fully provisioned
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn commit(&self, id: WalId) -> Result<()> {
        self.remove(id)
            .await
            .map_err(|source| CredentialError::LedgerDelete { id, source })
    }

    /// Remove an entry without classifying the failure
    pub async fn remove(&self, id: WalId) -> std::result::Result<(), StorageError> {
        self.storage.delete(&Self::key(id)).await
    }

    /// Read one entry
    pub async fn get(&self, id: WalId) -> std::result::Result<Option<WalEntry>, StorageError> {
        get_json(self.storage.as_ref(), &Self::key(id)).await
    }

    /// All entries currently in the ledger
    pub async fn entries(&self) -> Result<Vec<WalEntry>> {
        let keys = self.list_keys().await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let full = format!("{WAL_PREFIX}{key}");
            let entry = get_json(self.storage.as_ref(), &full)
                .await
                .map_err(|source| CredentialError::LedgerList { source })?;
            entries.extend(entry);
        }
        Ok(entries)
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.storage
            .list(WAL_PREFIX)
            .await
            .map_err(|source| CredentialError::LedgerList { source })
    }

    /// Roll back every entry older than `min_age`
    ///
    /// For each expired entry the user is deleted (a missing user counts as
    /// deleted) and then the entry is removed. Failures leave the entry in
    /// place for the next pass. Safe to run concurrently with issuance:
    /// entries inside the grace window are not touched.
    #[tracing::instrument(skip(self, identity, now))]
    pub async fn sweep(
        &self,
        identity: &dyn IdentityProvider,
        now: DateTime<Utc>,
        min_age: Duration,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for key in self.list_keys().await? {
            let full = format!("{WAL_PREFIX}{key}");
            let entry: WalEntry = match get_json(self.storage.as_ref(), &full).await {
                Ok(Some(entry)) => entry,
                // committed between list and get
                Ok(None) => continue,
                Err(err) => {
                    tracing::warn!(key = %full, error = %err, "unreadable WAL entry");
                    report.failed.push(SweepFailure {
                        key,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if entry.age(now) < min_age {
                report.pending.push(entry.id);
                continue;
            }
            if entry.kind != USER_ENTRY_KIND {
                tracing::warn!(key = %full, kind = %entry.kind, "unknown WAL entry kind");
                report.failed.push(SweepFailure {
                    key,
                    reason: format!("unknown WAL entry kind '{}'", entry.kind),
                });
                continue;
            }

            if let Err(err) = rollback::delete_user(identity, &entry.username).await {
                tracing::warn!(wal_id = %entry.id, username = %entry.username, error = %err, "rollback failed");
                report.failed.push(SweepFailure {
                    key,
                    reason: err.to_string(),
                });
                continue;
            }
            if let Err(err) = self.storage.delete(&full).await {
                tracing::warn!(wal_id = %entry.id, error = %err, "rolled back but WAL entry not removed");
                report.failed.push(SweepFailure {
                    key,
                    reason: err.to_string(),
                });
                continue;
            }

            tracing::info!(wal_id = %entry.id, username = %entry.username, "rolled back orphaned IAM user");
            report.rolled_back.push(entry.username);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Operation, ProviderErrorKind};
    use crate::providers::MemoryStorage;
    use crate::testing::FakeIdentityProvider;
    use crate::traits::CreateUserInput;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    const GRACE: Duration = Duration::from_secs(300);

    fn ledger() -> (MemoryStorage, WriteAheadLog) {
        let storage = MemoryStorage::new();
        let wal = WriteAheadLog::new(Arc::new(storage.clone()));
        (storage, wal)
    }

    async fn create(fake: &FakeIdentityProvider, username: &str) {
        fake.create_user(CreateUserInput {
            username: username.into(),
            path: "/".into(),
            permissions_boundary: None,
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_begin_and_commit() {
        let (storage, wal) = ledger();
        let now = Utc::now();
        let id = wal.begin("alice", now).await.unwrap();

        let entry = wal.get(id).await.unwrap().unwrap();
        assert_eq!(entry.username, "alice");
        assert_eq!(entry.kind, "user");
        assert_eq!(storage.keys_with_prefix(WAL_PREFIX), vec![WriteAheadLog::key(id)]);

        wal.commit(id).await.unwrap();
        assert!(storage.keys_with_prefix(WAL_PREFIX).is_empty());
    }

    #[tokio::test]
    async fn test_begin_failure_is_ledger_write() {
        let (storage, wal) = ledger();
        storage.fail_puts(WAL_PREFIX);
        assert!(matches!(
            wal.begin("alice", Utc::now()).await,
            Err(CredentialError::LedgerWrite { .. })
        ));
    }

    #[tokio::test]
    async fn test_commit_failure_is_ledger_delete() {
        let (storage, wal) = ledger();
        let id = wal.begin("alice", Utc::now()).await.unwrap();
        storage.fail_deletes(WAL_PREFIX);
        assert!(matches!(
            wal.commit(id).await,
            Err(CredentialError::LedgerDelete { id: failed, .. }) if failed == id
        ));
        assert_eq!(wal.entries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_respects_grace_window() {
        let (_, wal) = ledger();
        let fake = FakeIdentityProvider::new();
        let now = Utc::now();
        let id = wal.begin("fresh", now - TimeDelta::seconds(10)).await.unwrap();

        let report = wal.sweep(&fake, now, GRACE).await.unwrap();
        assert_eq!(report.pending, vec![id]);
        assert!(report.rolled_back.is_empty());
        assert_eq!(fake.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_deletes_orphan_and_entry() {
        let (storage, wal) = ledger();
        let fake = FakeIdentityProvider::new();
        let now = Utc::now();
        create(&fake, "orphan").await;
        fake.attach_user_policy("orphan", "arn:aws:iam::aws:policy/ReadOnlyAccess")
            .await
            .unwrap();
        wal.begin("orphan", now - TimeDelta::minutes(10)).await.unwrap();

        let report = wal.sweep(&fake, now, GRACE).await.unwrap();
        assert_eq!(report.rolled_back, vec!["orphan"]);
        assert!(report.is_clean());
        assert!(fake.user("orphan").is_none());
        assert!(storage.keys_with_prefix(WAL_PREFIX).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_tolerates_missing_user() {
        let (_, wal) = ledger();
        let fake = FakeIdentityProvider::new();
        let now = Utc::now();
        wal.begin("never-created", now - TimeDelta::hours(1)).await.unwrap();

        let report = wal.sweep(&fake, now, GRACE).await.unwrap();
        assert_eq!(report.rolled_back, vec!["never-created"]);
        assert!(wal.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_keeps_entry_on_provider_failure() {
        let (_, wal) = ledger();
        let fake = FakeIdentityProvider::new();
        let now = Utc::now();
        create(&fake, "orphan").await;
        wal.begin("orphan", now - TimeDelta::hours(1)).await.unwrap();
        fake.fail(Operation::DeleteUser, ProviderErrorKind::Throttled);

        let report = wal.sweep(&fake, now, GRACE).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(wal.entries().await.unwrap().len(), 1);

        fake.clear_failures();
        let report = wal.sweep(&fake, now, GRACE).await.unwrap();
        assert_eq!(report.rolled_back, vec!["orphan"]);
        assert!(wal.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_reports_unreadable_entries() {
        let (storage, wal) = ledger();
        let fake = FakeIdentityProvider::new();
        storage.insert_raw("wal/garbage", "not json");

        let report = wal.sweep(&fake, Utc::now(), GRACE).await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].key, "garbage");
        assert_eq!(storage.keys_with_prefix(WAL_PREFIX), vec!["wal/garbage"]);
    }

    #[tokio::test]
    async fn test_sweep_list_failure() {
        let (storage, wal) = ledger();
        storage.fail_lists(WAL_PREFIX);
        let fake = FakeIdentityProvider::new();
        assert!(matches!(
            wal.sweep(&fake, Utc::now(), GRACE).await,
            Err(CredentialError::LedgerList { .. })
        ));
    }
}
