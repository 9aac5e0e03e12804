//! AWS SDK identity provider
//!
//! Implements [`IdentityProvider`] with `aws-sdk-iam` and `aws-sdk-sts`.
//!
//! # Configuration
//!
//! ```rust,ignore
//! use nebula_aws::providers::{AwsIdentityProvider, AwsProviderConfig};
//! use std::time::Duration;
//!
//! let config = AwsProviderConfig {
//!     region: Some("us-east-1".into()),
//!     timeout: Duration::from_secs(10),
//!     ..Default::default()
//! };
//! let provider = AwsIdentityProvider::new(config).await;
//! ```
//!
//! Credentials come from the default chain (environment, shared config,
//! instance or task role). Every call is bounded by `timeout`; nothing is
//! retried here beyond what the SDK's own retry policy does.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_iam::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_iam::types::Tag;
use aws_sdk_sts::Client as StsClient;
use aws_sdk_sts::types::PolicyDescriptorType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{Operation, ProviderError, ProviderErrorKind, RootConfig};
use crate::traits::{
    AccessKey, AssumeRoleInput, AssumedRole, CreateUserInput, FederationTokenInput,
    GroupPolicies, IdentityProvider, SessionTokenInput, TemporaryCredentials,
};
use crate::utils::SecretString;

/// SDK client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AwsProviderConfig {
    /// AWS region (auto-detected from the environment if `None`)
    pub region: Option<String>,

    /// Custom IAM endpoint (LocalStack and similar)
    pub iam_endpoint: Option<String>,

    /// Custom STS endpoint
    pub sts_endpoint: Option<String>,

    /// Per-call timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for AwsProviderConfig {
    fn default() -> Self {
        Self {
            region: None,
            iam_endpoint: None,
            sts_endpoint: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RootConfig> for AwsProviderConfig {
    fn from(root: &RootConfig) -> Self {
        Self {
            region: root.region.clone(),
            ..Self::default()
        }
    }
}

/// Classify an AWS error code
pub fn classify_error_code(code: Option<&str>) -> ProviderErrorKind {
    match code {
        Some("NoSuchEntity" | "NoSuchEntityException") => ProviderErrorKind::NotFound,
        Some("EntityAlreadyExists" | "DeleteConflict" | "ConcurrentModification") => {
            ProviderErrorKind::Conflict
        }
        Some("Throttling" | "ThrottlingException" | "RequestLimitExceeded") => {
            ProviderErrorKind::Throttled
        }
        Some("AccessDenied" | "AccessDeniedException" | "ExpiredToken" | "RegionDisabledException") => {
            ProviderErrorKind::AccessDenied
        }
        Some(
            "ValidationError"
            | "InvalidInput"
            | "MalformedPolicyDocument"
            | "PackedPolicyTooLarge"
            | "LimitExceeded"
            | "InvalidParameterValue",
        ) => ProviderErrorKind::InvalidInput,
        Some("ServiceFailure" | "ServiceUnavailable" | "InternalFailure") => {
            ProviderErrorKind::Unavailable
        }
        _ => ProviderErrorKind::Other,
    }
}

fn map_sdk_error<E, R>(operation: Operation, err: &SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + StdError + 'static,
    R: Debug,
{
    let kind = match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => ProviderErrorKind::Unavailable,
        _ => classify_error_code(err.code()),
    };
    let message = err
        .message()
        .map_or_else(|| DisplayErrorContext(err).to_string(), str::to_owned);
    let mapped = ProviderError::new(operation, kind, message);
    match err.code() {
        Some(code) => mapped.with_code(code),
        None => mapped,
    }
}

fn to_chrono(value: &aws_sdk_sts::primitives::DateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos()).unwrap_or_default()
}

fn duration_seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

/// Marker for the next page of an IAM listing, `None` on the last page
fn next_marker(is_truncated: bool, marker: Option<&str>) -> Option<String> {
    marker.filter(|_| is_truncated).map(str::to_owned)
}

fn policy_descriptors(arns: Vec<String>) -> Option<Vec<PolicyDescriptorType>> {
    if arns.is_empty() {
        return None;
    }
    Some(
        arns.into_iter()
            .map(|arn| PolicyDescriptorType::builder().arn(arn).build())
            .collect(),
    )
}

fn missing(operation: Operation, what: &str) -> ProviderError {
    ProviderError::new(
        operation,
        ProviderErrorKind::Other,
        format!("response did not include {what}"),
    )
}

/// IAM/STS client
#[derive(Clone)]
pub struct AwsIdentityProvider {
    iam: IamClient,
    sts: StsClient,
    config: AwsProviderConfig,
}

impl Debug for AwsIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsIdentityProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AwsIdentityProvider {
    /// Build IAM and STS clients from the default credential chain
    pub async fn new(config: AwsProviderConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut iam = aws_sdk_iam::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.iam_endpoint {
            iam = iam.endpoint_url(endpoint);
        }
        let mut sts = aws_sdk_sts::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.sts_endpoint {
            sts = sts.endpoint_url(endpoint);
        }

        tracing::info!(
            provider = "AWS",
            region = ?config.region,
            timeout = ?config.timeout,
            "Initialized AWS identity provider"
        );

        Self {
            iam: IamClient::from_conf(iam.build()),
            sts: StsClient::from_conf(sts.build()),
            config,
        }
    }

    /// Run one SDK call under the configured timeout
    async fn call<T, E, R>(
        &self,
        operation: Operation,
        request: impl Future<Output = Result<T, SdkError<E, R>>>,
    ) -> Result<T, ProviderError>
    where
        E: ProvideErrorMetadata + StdError + 'static,
        R: Debug,
    {
        match tokio::time::timeout(self.config.timeout, request).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => {
                let mapped = map_sdk_error(operation, &err);
                tracing::debug!(%operation, kind = %mapped.kind, code = ?mapped.code, "AWS call failed");
                Err(mapped)
            }
            Err(_) => Err(ProviderError::new(
                operation,
                ProviderErrorKind::Unavailable,
                format!("timed out after {:?}", self.config.timeout),
            )),
        }
    }

    fn temporary_credentials(
        operation: Operation,
        credentials: Option<&aws_sdk_sts::types::Credentials>,
    ) -> Result<TemporaryCredentials, ProviderError> {
        let credentials = credentials.ok_or_else(|| missing(operation, "credentials"))?;
        Ok(TemporaryCredentials {
            access_key_id: credentials.access_key_id().to_owned(),
            secret_access_key: SecretString::new(credentials.secret_access_key()),
            session_token: SecretString::new(credentials.session_token()),
            expiration: to_chrono(credentials.expiration()),
        })
    }
}

#[async_trait]
impl IdentityProvider for AwsIdentityProvider {
    #[tracing::instrument(skip(self, input), fields(provider = "AWS", username = %input.username))]
    async fn create_user(&self, input: CreateUserInput) -> Result<(), ProviderError> {
        self.call(
            Operation::CreateUser,
            self.iam
                .create_user()
                .user_name(input.username)
                .path(input.path)
                .set_permissions_boundary(input.permissions_boundary)
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn attach_user_policy(&self, username: &str, policy_arn: &str) -> Result<(), ProviderError> {
        self.call(
            Operation::AttachUserPolicy,
            self.iam
                .attach_user_policy()
                .user_name(username)
                .policy_arn(policy_arn)
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn put_user_policy(
        &self,
        username: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<(), ProviderError> {
        self.call(
            Operation::PutUserPolicy,
            self.iam
                .put_user_policy()
                .user_name(username)
                .policy_name(policy_name)
                .policy_document(document)
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn add_user_to_group(&self, username: &str, group: &str) -> Result<(), ProviderError> {
        self.call(
            Operation::AddUserToGroup,
            self.iam
                .add_user_to_group()
                .user_name(username)
                .group_name(group)
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn tag_user(
        &self,
        username: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let tags = tags
            .iter()
            .map(|(key, value)| {
                Tag::builder().key(key).value(value).build().map_err(|e| {
                    ProviderError::new(
                        Operation::TagUser,
                        ProviderErrorKind::InvalidInput,
                        e.to_string(),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.call(
            Operation::TagUser,
            self.iam
                .tag_user()
                .user_name(username)
                .set_tags(Some(tags))
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn create_access_key(&self, username: &str) -> Result<AccessKey, ProviderError> {
        let output = self
            .call(
                Operation::CreateAccessKey,
                self.iam.create_access_key().user_name(username).send(),
            )
            .await?;
        let key = output
            .access_key()
            .ok_or_else(|| missing(Operation::CreateAccessKey, "an access key"))?;
        Ok(AccessKey {
            access_key_id: key.access_key_id().to_owned(),
            secret_access_key: SecretString::new(key.secret_access_key()),
        })
    }

    async fn list_groups_for_user(&self, username: &str) -> Result<Vec<String>, ProviderError> {
        let mut groups = Vec::new();
        let mut marker = None;
        loop {
            let page = self
                .call(
                    Operation::ListGroupsForUser,
                    self.iam
                        .list_groups_for_user()
                        .user_name(username)
                        .set_marker(marker.take())
                        .send(),
                )
                .await?;
            groups.extend(page.groups().iter().map(|g| g.group_name().to_owned()));
            match next_marker(page.is_truncated(), page.marker()) {
                Some(next) => marker = Some(next),
                None => return Ok(groups),
            }
        }
    }

    async fn remove_user_from_group(&self, username: &str, group: &str) -> Result<(), ProviderError> {
        self.call(
            Operation::RemoveUserFromGroup,
            self.iam
                .remove_user_from_group()
                .user_name(username)
                .group_name(group)
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn list_access_keys(&self, username: &str) -> Result<Vec<String>, ProviderError> {
        let mut keys = Vec::new();
        let mut marker = None;
        loop {
            let page = self
                .call(
                    Operation::ListAccessKeys,
                    self.iam
                        .list_access_keys()
                        .user_name(username)
                        .set_marker(marker.take())
                        .send(),
                )
                .await?;
            keys.extend(
                page.access_key_metadata()
                    .iter()
                    .filter_map(|k| k.access_key_id().map(str::to_owned)),
            );
            match next_marker(page.is_truncated(), page.marker()) {
                Some(next) => marker = Some(next),
                None => return Ok(keys),
            }
        }
    }

    async fn delete_access_key(&self, username: &str, access_key_id: &str) -> Result<(), ProviderError> {
        self.call(
            Operation::DeleteAccessKey,
            self.iam
                .delete_access_key()
                .user_name(username)
                .access_key_id(access_key_id)
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn list_user_policies(&self, username: &str) -> Result<Vec<String>, ProviderError> {
        let mut names = Vec::new();
        let mut marker = None;
        loop {
            let page = self
                .call(
                    Operation::ListUserPolicies,
                    self.iam
                        .list_user_policies()
                        .user_name(username)
                        .set_marker(marker.take())
                        .send(),
                )
                .await?;
            names.extend(page.policy_names().iter().cloned());
            match next_marker(page.is_truncated(), page.marker()) {
                Some(next) => marker = Some(next),
                None => return Ok(names),
            }
        }
    }

    async fn delete_user_policy(&self, username: &str, policy_name: &str) -> Result<(), ProviderError> {
        self.call(
            Operation::DeleteUserPolicy,
            self.iam
                .delete_user_policy()
                .user_name(username)
                .policy_name(policy_name)
                .send(),
        )
        .await?;
        Ok(())
    }

    async fn list_attached_user_policies(&self, username: &str) -> Result<Vec<String>, ProviderError> {
        let mut arns = Vec::new();
        let mut marker = None;
        loop {
            let page = self
                .call(
                    Operation::ListAttachedUserPolicies,
                    self.iam
                        .list_attached_user_policies()
                        .user_name(username)
                        .set_marker(marker.take())
                        .send(),
                )
                .await?;
            arns.extend(
                page.attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn().map(str::to_owned)),
            );
            match next_marker(page.is_truncated(), page.marker()) {
                Some(next) => marker = Some(next),
                None => return Ok(arns),
            }
        }
    }

    async fn detach_user_policy(&self, username: &str, policy_arn: &str) -> Result<(), ProviderError> {
        self.call(
            Operation::DetachUserPolicy,
            self.iam
                .detach_user_policy()
                .user_name(username)
                .policy_arn(policy_arn)
                .send(),
        )
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(provider = "AWS"))]
    async fn delete_user(&self, username: &str) -> Result<(), ProviderError> {
        self.call(
            Operation::DeleteUser,
            self.iam.delete_user().user_name(username).send(),
        )
        .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(provider = "AWS"))]
    async fn group_policies(&self, group: &str) -> Result<GroupPolicies, ProviderError> {
        let operation = Operation::GetGroupPolicies;
        let mut policies = GroupPolicies::default();

        let mut names = Vec::new();
        let mut marker = None;
        loop {
            let page = self
                .call(
                    operation,
                    self.iam
                        .list_group_policies()
                        .group_name(group)
                        .set_marker(marker.take())
                        .send(),
                )
                .await?;
            names.extend(page.policy_names().iter().cloned());
            match next_marker(page.is_truncated(), page.marker()) {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        for name in &names {
            let output = self
                .call(
                    operation,
                    self.iam
                        .get_group_policy()
                        .group_name(group)
                        .policy_name(name)
                        .send(),
                )
                .await?;
            // IAM returns inline documents URL-encoded
            let document = urlencoding::decode(output.policy_document()).map_err(|e| {
                ProviderError::new(
                    operation,
                    ProviderErrorKind::Other,
                    format!("group policy '{name}' is not valid UTF-8: {e}"),
                )
            })?;
            policies.documents.push(document.into_owned());
        }

        loop {
            let page = self
                .call(
                    operation,
                    self.iam
                        .list_attached_group_policies()
                        .group_name(group)
                        .set_marker(marker.take())
                        .send(),
                )
                .await?;
            policies.arns.extend(
                page.attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn().map(str::to_owned)),
            );
            match next_marker(page.is_truncated(), page.marker()) {
                Some(next) => marker = Some(next),
                None => break,
            }
        }
        Ok(policies)
    }

    #[tracing::instrument(skip(self, input), fields(provider = "AWS", role_arn = %input.role_arn))]
    async fn assume_role(&self, input: AssumeRoleInput) -> Result<AssumedRole, ProviderError> {
        let operation = Operation::AssumeRole;
        let output = self
            .call(
                operation,
                self.sts
                    .assume_role()
                    .role_arn(input.role_arn)
                    .role_session_name(input.role_session_name)
                    .duration_seconds(duration_seconds(input.duration))
                    .set_policy(input.policy)
                    .set_policy_arns(policy_descriptors(input.policy_arns))
                    .send(),
            )
            .await?;
        let credentials = Self::temporary_credentials(operation, output.credentials())?;
        let arn = output
            .assumed_role_user()
            .map(|user| user.arn().to_owned())
            .ok_or_else(|| missing(operation, "the assumed role user"))?;
        Ok(AssumedRole { credentials, arn })
    }

    #[tracing::instrument(skip(self, input), fields(provider = "AWS", name = %input.name))]
    async fn get_federation_token(
        &self,
        input: FederationTokenInput,
    ) -> Result<TemporaryCredentials, ProviderError> {
        let operation = Operation::GetFederationToken;
        let output = self
            .call(
                operation,
                self.sts
                    .get_federation_token()
                    .name(input.name)
                    .duration_seconds(duration_seconds(input.duration))
                    .set_policy(input.policy)
                    .set_policy_arns(policy_descriptors(input.policy_arns))
                    .send(),
            )
            .await?;
        Self::temporary_credentials(operation, output.credentials())
    }

    #[tracing::instrument(skip(self, input), fields(provider = "AWS", mfa = input.serial_number.is_some()))]
    async fn get_session_token(
        &self,
        input: SessionTokenInput,
    ) -> Result<TemporaryCredentials, ProviderError> {
        let operation = Operation::GetSessionToken;
        let output = self
            .call(
                operation,
                self.sts
                    .get_session_token()
                    .duration_seconds(duration_seconds(input.duration))
                    .set_serial_number(input.serial_number)
                    .set_token_code(input.token_code)
                    .send(),
            )
            .await?;
        Self::temporary_credentials(operation, output.credentials())
    }
}
