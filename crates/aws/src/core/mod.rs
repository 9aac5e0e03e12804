//! Core types for credential issuance

mod config;
mod error;
mod id;
mod role;
mod secret;

pub use config::{EngineConfig, LeaseConfig, RootConfig};
pub use error::{
    CredentialError, Operation, ProviderError, ProviderErrorKind, Result, StorageError,
    TemplateError,
};
pub use id::WalId;
pub use role::{CredentialType, RoleEntry};
pub use secret::{
    LeaseKind, LeaseState, SECRET_METADATA_VERSION, Secret, SecretData, SecretMetadata,
};
