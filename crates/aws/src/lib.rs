//! Nebula AWS - dynamic AWS credential broker
//!
//! Mints IAM and STS credentials on demand for operator-defined roles, tracks
//! their lease state, and tears down half-provisioned IAM users through a
//! write-ahead log when issuance fails partway through.
//!
//! # Features
//!
//! - **Four issuance strategies** - federation token, assumed role, session token, IAM user
//! - **Fail-closed policy scoping** - federation and assume-role never inherit the broker's identity
//! - **Crash-safe IAM users** - every created user is covered by a WAL entry until fully provisioned
//! - **Typed lease metadata** - renew/revoke dispatch on a versioned internal record
//!
//! # Example
//!
//! ```rust,ignore
//! use nebula_aws::prelude::*;
//! use std::sync::Arc;
//!
//! let broker = CredentialBroker::builder()
//!     .storage(Arc::new(MemoryStorage::new()))
//!     .identity(Arc::new(my_iam_client))
//!     .build()?;
//!
//! let secret = broker.creds("readonly", "alice").await?;
//! ```
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Core types and errors
pub mod core;
/// Root/lease/role configuration reader and writer
pub mod config;
/// Renew/revoke dispatch
pub mod lease;
/// Group policy merging
pub mod policy;
/// Identity-provider and storage implementations
pub mod providers;
/// IAM user teardown shared by revocation and the WAL sweep
pub mod rollback;
/// Issuance strategies and the broker facade
pub mod strategy;
/// Collaborator traits: storage, identity provider, clock
pub mod traits;
/// Username generation and the template language behind it
pub mod username;
/// Utilities
pub mod utils;
/// Rollback ledger (write-ahead log)
pub mod wal;

/// Recording fakes for tests
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// ── Root re-exports ─────────────────────────────────────────────────────────

pub use crate::core::{
    CredentialError, CredentialType, EngineConfig, LeaseConfig, LeaseKind, LeaseState,
    ProviderError, ProviderErrorKind, Result, RoleEntry, RootConfig, Secret, SecretMetadata,
    StorageError, WalId,
};
pub use crate::strategy::{CredentialBroker, CredentialBrokerBuilder, IssueRequest};
pub use crate::traits::{Clock, IdentityProvider, Storage, SystemClock};
pub use crate::utils::SecretString;

/// Commonly used types and traits
pub mod prelude {
    pub use crate::config::{ConfigReader, ConfigWriter};
    pub use crate::core::{
        CredentialError, CredentialType, EngineConfig, LeaseConfig, LeaseState, Result,
        RoleEntry, RootConfig, Secret, SecretMetadata,
    };
    pub use crate::lease::{LeaseCoordinator, RevokeOutcome};
    pub use crate::providers::MemoryStorage;
    pub use crate::strategy::{
        AssumeRoleRequest, CredentialBroker, FederationTokenRequest, IamUserRequest,
        IssueRequest, SessionTokenRequest,
    };
    pub use crate::traits::{Clock, IdentityProvider, Storage, SystemClock};
    pub use crate::wal::{SweepReport, WalEntry, WriteAheadLog};
}
