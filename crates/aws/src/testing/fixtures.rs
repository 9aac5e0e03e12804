//! Roles, timestamps and a wired-up broker for tests

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use crate::config::{ConfigReader, ConfigWriter};
use crate::core::{CredentialType, EngineConfig, LeaseConfig, RoleEntry, RootConfig};
use crate::providers::MemoryStorage;
use crate::strategy::CredentialBroker;
use crate::testing::FakeIdentityProvider;
use crate::traits::{FixedClock, Storage};

/// Managed policy used by the fixture roles
pub const READ_ONLY_ARN: &str = "arn:aws:iam::aws:policy/ReadOnlyAccess";

/// Target role of [`assumed_role`]
pub const DEPLOY_ROLE_ARN: &str = "arn:aws:iam::123456789012:role/deploy";

/// Inline document allowing `s3:GetObject`
pub const S3_READ_POLICY: &str = r#"{"Version":"2012-10-17","Statement":[{"Effect":"Allow","Action":"s3:GetObject","Resource":"*"}]}"#;

/// Instant every harness clock starts at
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .expect("fixture timestamp is unambiguous")
}

/// IAM user role with one managed policy
pub fn readonly_user() -> RoleEntry {
    RoleEntry::new(CredentialType::IamUser).with_policy_arn(READ_ONLY_ARN)
}

/// Federation role scoped by an inline document
pub fn federation() -> RoleEntry {
    RoleEntry::new(CredentialType::FederationToken).with_policy_document(S3_READ_POLICY)
}

/// Assumed role with a single target, scoped by [`READ_ONLY_ARN`]
pub fn assumed_role() -> RoleEntry {
    RoleEntry::new(CredentialType::AssumedRole)
        .with_role_arn(DEPLOY_ROLE_ARN)
        .with_policy_arn(READ_ONLY_ARN)
}

/// Session token role without MFA
pub fn session() -> RoleEntry {
    RoleEntry::new(CredentialType::SessionToken)
}

/// Broker over in-memory storage, a recording provider and a frozen clock
pub struct Harness {
    /// Backing storage; inspect or fail keys directly
    pub storage: MemoryStorage,
    /// Recording provider
    pub identity: Arc<FakeIdentityProvider>,
    /// Clock shared by the broker and the provider
    pub clock: FixedClock,
    /// Configuration writer over `storage`
    pub writer: ConfigWriter,
    /// Broker under test
    pub broker: CredentialBroker,
}

impl Harness {
    /// Harness with default engine settings, frozen at [`now`]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Harness with custom engine settings
    pub fn with_config(config: EngineConfig) -> Self {
        let storage = MemoryStorage::new();
        let clock = FixedClock(now());
        let identity = Arc::new(FakeIdentityProvider::new().with_clock(Arc::new(clock)));
        let shared: Arc<dyn Storage> = Arc::new(storage.clone());
        let broker = CredentialBroker::builder()
            .storage(shared.clone())
            .identity(identity.clone())
            .clock(Arc::new(clock))
            .config(config)
            .build()
            .expect("harness broker has every collaborator");
        Self {
            storage,
            identity,
            clock,
            writer: ConfigWriter::new(shared),
            broker,
        }
    }

    /// Same collaborators, clock advanced by `elapsed`
    pub fn broker_after(&self, elapsed: Duration) -> CredentialBroker {
        let later = FixedClock(self.clock.0 + elapsed);
        CredentialBroker::builder()
            .storage(Arc::new(self.storage.clone()))
            .identity(self.identity.clone())
            .clock(Arc::new(later))
            .config(*self.broker.config())
            .build()
            .expect("harness broker has every collaborator")
    }

    /// Reader over the harness storage
    pub fn reader(&self) -> ConfigReader {
        ConfigReader::new(Arc::new(self.storage.clone()))
    }

    /// Store a role
    pub async fn put_role(&self, name: &str, role: &RoleEntry) {
        self.writer
            .write_role(name, role)
            .await
            .expect("fixture role is valid");
    }

    /// Store the lease configuration
    pub async fn set_lease(&self, lease: Duration, lease_max: Duration) {
        self.writer
            .write_lease(LeaseConfig::new(lease, lease_max))
            .await
            .expect("fixture lease is valid");
    }

    /// Store a username template
    pub async fn set_template(&self, template: &str) {
        let root = RootConfig {
            username_template: Some(template.to_owned()),
            region: None,
        };
        self.writer
            .write_root(&root)
            .await
            .expect("fixture template parses");
    }

    /// Keys currently held in the rollback ledger
    pub fn wal_keys(&self) -> Vec<String> {
        self.storage.keys_with_prefix(crate::wal::WAL_PREFIX)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
