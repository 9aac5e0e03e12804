//! Configuration reader and writer
//!
//! Records are JSON documents in the storage collaborator:
//!
//! | Key            | Record                                  | When absent            |
//! |----------------|-----------------------------------------|------------------------|
//! | `config/root`  | [`RootConfig`]                          | default template       |
//! | `config/lease` | [`LeaseConfig`]                         | zero lease             |
//! | `role/<name>`  | [`RoleEntry`]                           | `RoleNotFound`         |
//!
//! Reads take a fresh snapshot on every call; nothing is cached between
//! issuances.

use std::sync::Arc;

use crate::core::{CredentialError, LeaseConfig, Result, RoleEntry, RootConfig};
use crate::traits::{Storage, get_json, put_json};
use crate::username::UsernameGenerator;

/// Storage key of the root configuration
pub const ROOT_CONFIG_KEY: &str = "config/root";
/// Storage key of the lease configuration
pub const LEASE_CONFIG_KEY: &str = "config/lease";
/// Storage prefix of role entries
pub const ROLE_PREFIX: &str = "role/";

fn role_key(name: &str) -> String {
    format!("{ROLE_PREFIX}{name}")
}

/// Reads configuration snapshots from storage
#[derive(Clone)]
pub struct ConfigReader {
    storage: Arc<dyn Storage>,
}

impl ConfigReader {
    /// Create a reader over `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn read<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        get_json(self.storage.as_ref(), key)
            .await
            .map_err(|source| CredentialError::ConfigUnavailable {
                key: key.to_owned(),
                source,
            })
    }

    /// Root configuration, default when absent
    pub async fn root(&self) -> Result<RootConfig> {
        Ok(self.read(ROOT_CONFIG_KEY).await?.unwrap_or_default())
    }

    /// Lease configuration, zero when absent
    pub async fn lease(&self) -> Result<LeaseConfig> {
        Ok(self.read(LEASE_CONFIG_KEY).await?.unwrap_or_default())
    }

    /// Role entry by name
    pub async fn role(&self, name: &str) -> Result<RoleEntry> {
        self.read(&role_key(name))
            .await?
            .ok_or_else(|| CredentialError::RoleNotFound {
                name: name.to_owned(),
            })
    }

    /// Names of all roles
    pub async fn roles(&self) -> Result<Vec<String>> {
        self.storage
            .list(ROLE_PREFIX)
            .await
            .map_err(|source| CredentialError::ConfigUnavailable {
                key: ROLE_PREFIX.to_owned(),
                source,
            })
    }
}

impl std::fmt::Debug for ConfigReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigReader").finish_non_exhaustive()
    }
}

/// Validates and writes configuration records
#[derive(Clone)]
pub struct ConfigWriter {
    storage: Arc<dyn Storage>,
}

impl ConfigWriter {
    /// Create a writer over `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn write<T: serde::Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        put_json(self.storage.as_ref(), key, value)
            .await
            .map_err(|source| CredentialError::ConfigWrite {
                key: key.to_owned(),
                source,
            })
    }

    /// Write the root configuration; the username template must parse
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn write_root(&self, config: &RootConfig) -> Result<()> {
        UsernameGenerator::new(config.username_template())?;
        self.write(ROOT_CONFIG_KEY, config).await
    }

    /// Write the lease configuration
    #[tracing::instrument(level = "debug", skip(self), fields(lease = ?config.lease, lease_max = ?config.lease_max))]
    pub async fn write_lease(&self, config: LeaseConfig) -> Result<()> {
        if !config.lease_max.is_zero() && config.lease > config.lease_max {
            return Err(CredentialError::invalid_request(
                "lease cannot be greater than lease_max",
            ));
        }
        self.write(LEASE_CONFIG_KEY, &config).await
    }

    /// Validate and write a role
    #[tracing::instrument(level = "debug", skip(self, role), fields(credential_type = %role.credential_type))]
    pub async fn write_role(&self, name: &str, role: &RoleEntry) -> Result<()> {
        if name.is_empty() || name.contains('/') {
            return Err(CredentialError::invalid_request(format!(
                "invalid role name '{name}'"
            )));
        }
        role.validate()?;
        self.write(&role_key(name), role).await?;
        tracing::info!(role = name, "role written");
        Ok(())
    }

    /// Delete a role; deleting an absent role is not an error
    pub async fn delete_role(&self, name: &str) -> Result<()> {
        let key = role_key(name);
        self.storage
            .delete(&key)
            .await
            .map_err(|source| CredentialError::ConfigWrite { key, source })
    }
}

impl std::fmt::Debug for ConfigWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWriter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CredentialType, StorageError};
    use crate::providers::MemoryStorage;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn pair() -> (MemoryStorage, ConfigReader, ConfigWriter) {
        let storage = MemoryStorage::new();
        let shared: Arc<dyn Storage> = Arc::new(storage.clone());
        (storage, ConfigReader::new(shared.clone()), ConfigWriter::new(shared))
    }

    #[tokio::test]
    async fn test_defaults_when_absent() {
        let (_, reader, _) = pair();
        assert_eq!(reader.root().await.unwrap(), RootConfig::default());
        assert_eq!(reader.lease().await.unwrap(), LeaseConfig::default());
        assert!(matches!(
            reader.role("missing").await,
            Err(CredentialError::RoleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_round_trip_through_storage() {
        let (storage, reader, writer) = pair();
        let lease = LeaseConfig::new(Duration::from_secs(3600), Duration::from_secs(86_400));
        writer.write_lease(lease).await.unwrap();
        assert_eq!(reader.lease().await.unwrap(), lease);

        let raw = storage.keys_with_prefix("config/");
        assert_eq!(raw, vec!["config/lease"]);

        let role = RoleEntry::new(CredentialType::IamUser)
            .with_policy_arn("arn:aws:iam::aws:policy/ReadOnlyAccess");
        writer.write_role("readonly", &role).await.unwrap();
        assert_eq!(reader.role("readonly").await.unwrap(), role);
        assert_eq!(reader.roles().await.unwrap(), vec!["readonly"]);

        writer.delete_role("readonly").await.unwrap();
        assert!(reader.role("readonly").await.is_err());
    }

    #[tokio::test]
    async fn test_lease_is_read_from_humantime_record() {
        let (storage, reader, _) = pair();
        storage.insert_raw(LEASE_CONFIG_KEY, r#"{"lease":"30m","lease_max":"12h"}"#);
        let lease = reader.lease().await.unwrap();
        assert_eq!(lease.lease, Duration::from_secs(1800));
        assert_eq!(lease.lease_max, Duration::from_secs(43_200));
    }

    #[tokio::test]
    async fn test_unreadable_config_is_unavailable() {
        let (storage, reader, _) = pair();
        storage.fail_gets("config/");
        assert!(matches!(
            reader.root().await,
            Err(CredentialError::ConfigUnavailable {
                source: StorageError::Read { .. },
                ..
            })
        ));

        storage.clear_failures();
        storage.insert_raw(ROOT_CONFIG_KEY, "not json");
        assert!(matches!(
            reader.root().await,
            Err(CredentialError::ConfigUnavailable {
                source: StorageError::Decode { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_writer_validates() {
        let (_, _, writer) = pair();
        let bad_template = RootConfig {
            username_template: Some("{{ if }}".into()),
            region: None,
        };
        assert!(matches!(
            writer.write_root(&bad_template).await,
            Err(CredentialError::TemplateInvalid { .. })
        ));

        let inverted = LeaseConfig::new(Duration::from_secs(7200), Duration::from_secs(60));
        assert!(writer.write_lease(inverted).await.is_err());

        let role = RoleEntry::new(CredentialType::AssumedRole);
        assert!(matches!(
            writer.write_role("deploy", &role).await,
            Err(CredentialError::InvalidRequest { .. })
        ));
        let role = RoleEntry::new(CredentialType::IamUser);
        assert!(writer.write_role("a/b", &role).await.is_err());
    }

    #[tokio::test]
    async fn test_write_failure_is_config_write() {
        let (storage, _, writer) = pair();
        storage.fail_puts("role/");
        let role = RoleEntry::new(CredentialType::IamUser);
        assert!(matches!(
            writer.write_role("readonly", &role).await,
            Err(CredentialError::ConfigWrite { .. })
        ));
    }
}
