//! Identity-provider collaborator (IAM + STS)
//!
//! Every method maps to a single provider call (the listing methods and
//! [`IdentityProvider::group_policies`] may page internally). Calls are
//! independently failable and time-bounded by the implementation; the broker
//! never retries them.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::ProviderError;
use crate::utils::SecretString;

/// Input for `CreateUser`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateUserInput {
    /// User name
    pub username: String,
    /// IAM path
    pub path: String,
    /// Permissions boundary ARN
    pub permissions_boundary: Option<String>,
}

/// Access key pair minted for an IAM user
#[derive(Debug, Clone)]
pub struct AccessKey {
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: SecretString,
}

/// Temporary STS credentials
#[derive(Debug, Clone)]
pub struct TemporaryCredentials {
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: SecretString,
    /// Session token
    pub session_token: SecretString,
    /// Provider-reported expiration
    pub expiration: DateTime<Utc>,
}

/// Result of `AssumeRole`
#[derive(Debug, Clone)]
pub struct AssumedRole {
    /// Temporary credentials
    pub credentials: TemporaryCredentials,
    /// ARN of the assumed role user
    pub arn: String,
}

/// Input for `GetFederationToken`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationTokenInput {
    /// Federated user name
    pub name: String,
    /// Requested lifetime
    pub duration: Duration,
    /// Session policy document
    pub policy: Option<String>,
    /// Session managed policy ARNs
    pub policy_arns: Vec<String>,
}

/// Input for `AssumeRole`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleInput {
    /// Role to assume
    pub role_arn: String,
    /// Session name
    pub role_session_name: String,
    /// Requested lifetime
    pub duration: Duration,
    /// Session policy document
    pub policy: Option<String>,
    /// Session managed policy ARNs
    pub policy_arns: Vec<String>,
}

/// Input for `GetSessionToken`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokenInput {
    /// Requested lifetime
    pub duration: Duration,
    /// MFA device serial
    pub serial_number: Option<String>,
    /// MFA code
    pub token_code: Option<String>,
}

/// Policies inherited from one IAM group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPolicies {
    /// Inline policy documents (already URL-decoded)
    pub documents: Vec<String>,
    /// Attached managed policy ARNs
    pub arns: Vec<String>,
}

/// IAM and STS operations used by the broker
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    // ── IAM user provisioning ───────────────────────────────────────────────

    /// Create an IAM user
    async fn create_user(&self, input: CreateUserInput) -> Result<(), ProviderError>;

    /// Attach a managed policy to a user
    async fn attach_user_policy(&self, username: &str, policy_arn: &str)
    -> Result<(), ProviderError>;

    /// Put an inline policy on a user
    async fn put_user_policy(
        &self,
        username: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<(), ProviderError>;

    /// Add a user to a group
    async fn add_user_to_group(&self, username: &str, group: &str) -> Result<(), ProviderError>;

    /// Tag a user
    async fn tag_user(
        &self,
        username: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError>;

    /// Mint an access key for a user
    async fn create_access_key(&self, username: &str) -> Result<AccessKey, ProviderError>;

    // ── IAM user teardown ───────────────────────────────────────────────────

    /// Groups the user belongs to
    async fn list_groups_for_user(&self, username: &str) -> Result<Vec<String>, ProviderError>;

    /// Remove a user from a group
    async fn remove_user_from_group(&self, username: &str, group: &str)
    -> Result<(), ProviderError>;

    /// Access key IDs of the user
    async fn list_access_keys(&self, username: &str) -> Result<Vec<String>, ProviderError>;

    /// Delete an access key
    async fn delete_access_key(
        &self,
        username: &str,
        access_key_id: &str,
    ) -> Result<(), ProviderError>;

    /// Inline policy names of the user
    async fn list_user_policies(&self, username: &str) -> Result<Vec<String>, ProviderError>;

    /// Delete an inline policy
    async fn delete_user_policy(&self, username: &str, policy_name: &str)
    -> Result<(), ProviderError>;

    /// Managed policy ARNs attached to the user
    async fn list_attached_user_policies(
        &self,
        username: &str,
    ) -> Result<Vec<String>, ProviderError>;

    /// Detach a managed policy
    async fn detach_user_policy(&self, username: &str, policy_arn: &str)
    -> Result<(), ProviderError>;

    /// Delete the user
    async fn delete_user(&self, username: &str) -> Result<(), ProviderError>;

    // ── Groups ──────────────────────────────────────────────────────────────

    /// Inline documents and attached ARNs of a group
    async fn group_policies(&self, group: &str) -> Result<GroupPolicies, ProviderError>;

    // ── STS ─────────────────────────────────────────────────────────────────

    /// `AssumeRole`
    async fn assume_role(&self, input: AssumeRoleInput) -> Result<AssumedRole, ProviderError>;

    /// `GetFederationToken`
    async fn get_federation_token(
        &self,
        input: FederationTokenInput,
    ) -> Result<TemporaryCredentials, ProviderError>;

    /// `GetSessionToken`
    async fn get_session_token(
        &self,
        input: SessionTokenInput,
    ) -> Result<TemporaryCredentials, ProviderError>;
}
