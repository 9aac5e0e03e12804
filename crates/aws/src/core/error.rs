//! Error types for credential issuance and lease management
//!
//! This module defines the error hierarchy:
//! - [`CredentialError`]: top-level error returned by every broker operation
//! - [`ProviderError`]: a failed IAM/STS call, with a retry classification
//! - [`StorageError`]: a failed read/write against the storage collaborator
//! - [`TemplateError`]: a username template that does not parse or render
//!
//! Fail-closed errors ([`CredentialError::InsufficientPolicy`],
//! [`CredentialError::UsernameTooLong`]) are raised before any external call
//! is made, so they never accompany partial credentials.
//!
//! ```
//! use nebula_aws::core::{CredentialError, Operation, ProviderError, ProviderErrorKind};
//!
//! let err: CredentialError =
//!     ProviderError::new(Operation::CreateUser, ProviderErrorKind::Throttled, "slow down").into();
//! assert!(err.is_retryable());
//! ```

use std::fmt;

use thiserror::Error;

use super::id::WalId;
use super::role::CredentialType;

/// Top-level broker error
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Configuration could not be read from storage (or did not decode)
    #[error("unable to read configuration '{key}': {source}")]
    ConfigUnavailable {
        /// Storage key that failed
        key: String,
        /// Underlying storage error
        #[source]
        source: StorageError,
    },

    /// Configuration or role could not be written to storage
    #[error("unable to write configuration '{key}': {source}")]
    ConfigWrite {
        /// Storage key that failed
        key: String,
        /// Underlying storage error
        #[source]
        source: StorageError,
    },

    /// Username template does not parse or render
    #[error("invalid username template: {source}")]
    TemplateInvalid {
        /// Underlying template error
        #[source]
        source: TemplateError,
    },

    /// Generated username exceeds the provider length limit
    #[error(
        "the username generated by the template exceeds the {username_kind} username length limits of {limit} chars (got {length})"
    )]
    UsernameTooLong {
        /// `IAM` or `STS`
        username_kind: &'static str,
        /// Length of the rendered name in bytes
        length: usize,
        /// Provider limit
        limit: usize,
    },

    /// Neither a policy document nor a policy ARN scopes the credential
    #[error(
        "must specify at least one of policy_arns or policy_document with {credential_type} credential_type"
    )]
    InsufficientPolicy {
        /// Strategy that refused to issue
        credential_type: CredentialType,
    },

    /// Policy documents could not be combined
    #[error("invalid policy document: {reason}")]
    PolicyInvalid {
        /// Parse failure description
        reason: String,
    },

    /// IAM/STS call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// WAL entry could not be written; no external call was made
    #[error("error writing WAL entry for '{username}': {source}")]
    LedgerWrite {
        /// User the entry would have covered
        username: String,
        /// Underlying storage error
        #[source]
        source: StorageError,
    },

    /// WAL entry could not be deleted after the user was fully provisioned
    #[error("failed to commit WAL entry {id}: {source}")]
    LedgerDelete {
        /// Entry left behind
        id: WalId,
        /// Underlying storage error
        #[source]
        source: StorageError,
    },

    /// WAL entries could not be listed for a sweep
    #[error("failed to list WAL entries: {source}")]
    LedgerList {
        /// Underlying storage error
        #[source]
        source: StorageError,
    },

    /// User creation failed and the WAL entry could not be removed either
    #[error("failed to delete WAL entry {id}: {source} (while handling: {create_error})")]
    LedgerDeleteAfterCreate {
        /// Entry left behind
        id: WalId,
        /// The original `CreateUser` failure
        create_error: ProviderError,
        /// Underlying storage error
        #[source]
        source: StorageError,
    },

    /// Secret internal metadata is missing a required field or has the wrong shape
    #[error("malformed secret metadata: {reason}")]
    MalformedSecretMetadata {
        /// What is wrong
        reason: String,
    },

    /// Role does not exist
    #[error("role '{name}' not found")]
    RoleNotFound {
        /// Role name
        name: String,
    },

    /// Request or role entry rejected before any external call
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// Rejection reason
        reason: String,
    },
}

impl CredentialError {
    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedSecretMetadata {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request may succeed
    ///
    /// Only provider failures classified as throttling or unavailability are
    /// retryable; the broker itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, CredentialError>;

/// IAM/STS operation, used to label provider failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `iam:CreateUser`
    CreateUser,
    /// `iam:AttachUserPolicy`
    AttachUserPolicy,
    /// `iam:PutUserPolicy`
    PutUserPolicy,
    /// `iam:AddUserToGroup`
    AddUserToGroup,
    /// `iam:TagUser`
    TagUser,
    /// `iam:CreateAccessKey`
    CreateAccessKey,
    /// `iam:ListGroupsForUser`
    ListGroupsForUser,
    /// `iam:RemoveUserFromGroup`
    RemoveUserFromGroup,
    /// `iam:ListAccessKeys`
    ListAccessKeys,
    /// `iam:DeleteAccessKey`
    DeleteAccessKey,
    /// `iam:ListUserPolicies`
    ListUserPolicies,
    /// `iam:DeleteUserPolicy`
    DeleteUserPolicy,
    /// `iam:ListAttachedUserPolicies`
    ListAttachedUserPolicies,
    /// `iam:DetachUserPolicy`
    DetachUserPolicy,
    /// `iam:DeleteUser`
    DeleteUser,
    /// Reading a group's inline and attached policies
    GetGroupPolicies,
    /// `sts:AssumeRole`
    AssumeRole,
    /// `sts:GetFederationToken`
    GetFederationToken,
    /// `sts:GetSessionToken`
    GetSessionToken,
}

impl Operation {
    /// Gerund phrase used in error messages ("creating IAM user")
    pub fn describe(self) -> &'static str {
        match self {
            Self::CreateUser => "creating IAM user",
            Self::AttachUserPolicy => "attaching user policy",
            Self::PutUserPolicy => "putting user policy",
            Self::AddUserToGroup => "adding user to group",
            Self::TagUser => "adding tags to user",
            Self::CreateAccessKey => "creating access keys",
            Self::ListGroupsForUser => "listing user groups",
            Self::RemoveUserFromGroup => "removing user from group",
            Self::ListAccessKeys => "listing access keys",
            Self::DeleteAccessKey => "deleting access key",
            Self::ListUserPolicies => "listing user policies",
            Self::DeleteUserPolicy => "deleting user policy",
            Self::ListAttachedUserPolicies => "listing attached user policies",
            Self::DetachUserPolicy => "detaching user policy",
            Self::DeleteUser => "deleting IAM user",
            Self::GetGroupPolicies => "reading group policies",
            Self::AssumeRole => "assuming role",
            Self::GetFederationToken => "generating federation token",
            Self::GetSessionToken => "generating session token",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// Entity does not exist (`NoSuchEntity`)
    NotFound,
    /// Entity already exists (`EntityAlreadyExists`)
    Conflict,
    /// Request rate exceeded
    Throttled,
    /// Caller lacks permission
    AccessDenied,
    /// Provider rejected the input
    InvalidInput,
    /// Transport failure or service unavailable
    Unavailable,
    /// Anything else
    Other,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Throttled => "throttled",
            Self::AccessDenied => "access denied",
            Self::InvalidInput => "invalid input",
            Self::Unavailable => "unavailable",
            Self::Other => "error",
        };
        f.write_str(label)
    }
}

/// A failed IAM/STS call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("error {operation}: {message}")]
pub struct ProviderError {
    /// Operation that failed
    pub operation: Operation,
    /// Failure classification
    pub kind: ProviderErrorKind,
    /// Provider error code, when the provider returned one
    pub code: Option<String>,
    /// Human-readable message
    pub message: String,
}

impl ProviderError {
    /// Create a provider error without a provider code
    pub fn new(operation: Operation, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            operation,
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Attach the provider's error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Throttling and unavailability may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Throttled | ProviderErrorKind::Unavailable
        )
    }

    /// The targeted entity does not exist
    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

/// Storage collaborator errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend failed to read a key
    #[error("failed to read '{key}': {reason}")]
    Read {
        /// Key
        key: String,
        /// Backend message
        reason: String,
    },

    /// Backend failed to write a key
    #[error("failed to write '{key}': {reason}")]
    Write {
        /// Key
        key: String,
        /// Backend message
        reason: String,
    },

    /// Backend failed to delete a key
    #[error("failed to delete '{key}': {reason}")]
    Delete {
        /// Key
        key: String,
        /// Backend message
        reason: String,
    },

    /// Backend failed to list a prefix
    #[error("failed to list '{prefix}': {reason}")]
    List {
        /// Prefix
        prefix: String,
        /// Backend message
        reason: String,
    },

    /// Stored bytes are not the expected JSON record
    #[error("failed to decode '{key}': {source}")]
    Decode {
        /// Key
        key: String,
        /// JSON error
        #[source]
        source: serde_json::Error,
    },

    /// Record could not be serialized
    #[error("failed to encode '{key}': {source}")]
    Encode {
        /// Key
        key: String,
        /// JSON error
        #[source]
        source: serde_json::Error,
    },
}

/// Username template errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// Template text does not parse
    #[error("parse error at offset {offset}: {reason}")]
    Parse {
        /// Byte offset of the offending action
        offset: usize,
        /// What went wrong
        reason: String,
    },

    /// Template parsed but failed while rendering
    #[error("render error: {reason}")]
    Render {
        /// What went wrong
        reason: String,
    },
}

impl TemplateError {
    pub(crate) fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn render(reason: impl Into<String>) -> Self {
        Self::Render {
            reason: reason.into(),
        }
    }
}

impl From<TemplateError> for CredentialError {
    fn from(source: TemplateError) -> Self {
        Self::TemplateInvalid { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::new(
            Operation::CreateUser,
            ProviderErrorKind::Conflict,
            "user already exists",
        )
        .with_code("EntityAlreadyExists");
        assert_eq!(err.to_string(), "error creating IAM user: user already exists");
        assert_eq!(err.code.as_deref(), Some("EntityAlreadyExists"));
    }

    #[test]
    fn test_retry_classification() {
        let throttled =
            ProviderError::new(Operation::AssumeRole, ProviderErrorKind::Throttled, "rate");
        let denied =
            ProviderError::new(Operation::AssumeRole, ProviderErrorKind::AccessDenied, "no");
        assert!(throttled.is_retryable());
        assert!(!denied.is_retryable());
        assert!(CredentialError::from(throttled).is_retryable());
        assert!(!CredentialError::invalid_request("bad ttl").is_retryable());
    }

    #[test]
    fn test_insufficient_policy_message() {
        let err = CredentialError::InsufficientPolicy {
            credential_type: CredentialType::FederationToken,
        };
        assert_eq!(
            err.to_string(),
            "must specify at least one of policy_arns or policy_document with federation_token credential_type"
        );
    }

    #[test]
    fn test_ledger_delete_after_create_keeps_both_errors() {
        let create_error = ProviderError::new(
            Operation::CreateUser,
            ProviderErrorKind::AccessDenied,
            "not authorized",
        );
        let err = CredentialError::LedgerDeleteAfterCreate {
            id: WalId::new(),
            create_error,
            source: StorageError::Delete {
                key: "wal/x".into(),
                reason: "disk full".into(),
            },
        };
        let message = err.to_string();
        assert!(message.contains("disk full"));
        assert!(message.contains("error creating IAM user: not authorized"));
        assert!(err.source().is_some());
    }
}
