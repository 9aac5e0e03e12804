//! Issuance strategies and the broker facade
//!
//! [`CredentialBroker`] is the single entry point. Every issuance goes through
//! [`CredentialBroker::issue`] with a closed [`IssueRequest`]; the strategy is
//! selected by the request variant and must agree with the role's
//! credential type.
//!
//! | Strategy                  | Name limit | Ledger | Renewable |
//! |---------------------------|------------|--------|-----------|
//! | [`FederationTokenRequest`] | 32         | no     | no        |
//! | [`AssumeRoleRequest`]      | 64         | no     | no        |
//! | [`SessionTokenRequest`]    | n/a        | no     | no        |
//! | [`IamUserRequest`]         | 64         | yes    | yes       |

mod assume_role;
mod federation;
mod iam_user;
mod session_token;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigReader;
use crate::core::{
    CredentialError, CredentialType, EngineConfig, Result, RoleEntry, Secret, SecretData,
};
use crate::lease::{LeaseCoordinator, RevokeOutcome};
use crate::traits::{Clock, IdentityProvider, Storage, SystemClock, TemporaryCredentials};
use crate::username::UsernameGenerator;
use crate::wal::{SweepReport, WriteAheadLog};

/// `GetFederationToken` for a role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FederationTokenRequest {
    /// Role name
    pub role: String,
    /// Requested lifetime
    pub ttl: Option<Duration>,
}

/// `AssumeRole` for a role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    /// Role name
    pub role: String,
    /// Caller display name, used when generating the session name
    pub display_name: String,
    /// Explicit session name; only sanitized, never templated
    pub role_session_name: Option<String>,
    /// One of the role's `role_arns`; required when it has several
    pub role_arn: Option<String>,
    /// Requested lifetime
    pub ttl: Option<Duration>,
}

/// `GetSessionToken` for a role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTokenRequest {
    /// Role name
    pub role: String,
    /// MFA device serial; overrides the role's `mfa_serial_number`
    pub serial_number: Option<String>,
    /// MFA code
    pub token_code: Option<String>,
    /// Requested lifetime
    pub ttl: Option<Duration>,
}

/// Long-lived IAM user for a role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IamUserRequest {
    /// Role name
    pub role: String,
    /// Caller display name, used when generating the user name
    pub display_name: String,
}

/// A credential request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueRequest {
    /// Federation token
    FederationToken(FederationTokenRequest),
    /// Assumed role session
    AssumeRole(AssumeRoleRequest),
    /// Session token
    SessionToken(SessionTokenRequest),
    /// IAM user with an access key
    IamUser(IamUserRequest),
}

impl IssueRequest {
    /// Role the request is issued against
    pub fn role(&self) -> &str {
        match self {
            Self::FederationToken(request) => &request.role,
            Self::AssumeRole(request) => &request.role,
            Self::SessionToken(request) => &request.role,
            Self::IamUser(request) => &request.role,
        }
    }

    /// Credential type the role must have
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::FederationToken(_) => CredentialType::FederationToken,
            Self::AssumeRole(_) => CredentialType::AssumedRole,
            Self::SessionToken(_) => CredentialType::SessionToken,
            Self::IamUser(_) => CredentialType::IamUser,
        }
    }

    /// Default request of the role's type, as used by `creds/<role>`
    pub fn for_role(role: &str, credential_type: CredentialType, display_name: &str) -> Self {
        let role = role.to_owned();
        match credential_type {
            CredentialType::FederationToken => {
                Self::FederationToken(FederationTokenRequest { role, ttl: None })
            }
            CredentialType::AssumedRole => Self::AssumeRole(AssumeRoleRequest {
                role,
                display_name: display_name.to_owned(),
                ..AssumeRoleRequest::default()
            }),
            CredentialType::SessionToken => Self::SessionToken(SessionTokenRequest {
                role,
                ..SessionTokenRequest::default()
            }),
            CredentialType::IamUser => Self::IamUser(IamUserRequest {
                role,
                display_name: display_name.to_owned(),
            }),
        }
    }
}

/// Issues credentials and manages their leases
#[derive(Clone)]
pub struct CredentialBroker {
    identity: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    reader: ConfigReader,
    wal: WriteAheadLog,
    leases: LeaseCoordinator,
}

impl std::fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`CredentialBroker`]
#[derive(Default)]
pub struct CredentialBrokerBuilder {
    storage: Option<Arc<dyn Storage>>,
    identity: Option<Arc<dyn IdentityProvider>>,
    clock: Option<Arc<dyn Clock>>,
    config: EngineConfig,
}

impl CredentialBrokerBuilder {
    /// Storage for configuration, roles and the ledger (required)
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// IAM/STS client (required)
    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Time source; the wall clock by default
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Engine settings
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the broker
    pub fn build(self) -> Result<CredentialBroker> {
        let storage = self
            .storage
            .ok_or_else(|| CredentialError::invalid_request("broker requires a storage backend"))?;
        let identity = self
            .identity
            .ok_or_else(|| CredentialError::invalid_request("broker requires an identity provider"))?;
        let reader = ConfigReader::new(storage.clone());
        Ok(CredentialBroker {
            leases: LeaseCoordinator::new(reader.clone(), identity.clone()),
            wal: WriteAheadLog::new(storage),
            reader,
            identity,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            config: self.config,
        })
    }
}

impl CredentialBroker {
    /// Start building a broker
    pub fn builder() -> CredentialBrokerBuilder {
        CredentialBrokerBuilder::default()
    }

    /// Engine settings in use
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lease coordinator sharing this broker's collaborators
    pub fn leases(&self) -> &LeaseCoordinator {
        &self.leases
    }

    /// Rollback ledger
    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }

    /// Issue a credential
    ///
    /// The role named by the request must exist and have the credential type
    /// the request variant implies.
    #[tracing::instrument(skip(self, request), fields(role = request.role(), credential_type = %request.credential_type()))]
    pub async fn issue(&self, request: IssueRequest) -> Result<Secret> {
        let role = self.reader.role(request.role()).await?;
        if role.credential_type != request.credential_type() {
            return Err(CredentialError::invalid_request(format!(
                "role '{}' issues {} credentials, not {}",
                request.role(),
                role.credential_type,
                request.credential_type()
            )));
        }

        let secret = match request {
            IssueRequest::FederationToken(request) => {
                self.issue_federation_token(&role, &request).await
            }
            IssueRequest::AssumeRole(request) => self.issue_assumed_role(&role, &request).await,
            IssueRequest::SessionToken(request) => self.issue_session_token(&role, &request).await,
            IssueRequest::IamUser(request) => self.issue_iam_user(&role, &request).await,
        }?;

        tracing::info!(
            is_sts = secret.is_sts(),
            ttl_secs = secret.ttl.as_secs(),
            renewable = secret.renewable,
            "credential issued"
        );
        Ok(secret)
    }

    /// Issue whatever the role's credential type prescribes (`creds/<role>`)
    pub async fn creds(&self, role: &str, display_name: &str) -> Result<Secret> {
        let entry = self.reader.role(role).await?;
        self.issue(IssueRequest::for_role(role, entry.credential_type, display_name))
            .await
    }

    /// Issue a federation token
    pub async fn federation_token(&self, request: FederationTokenRequest) -> Result<Secret> {
        self.issue(IssueRequest::FederationToken(request)).await
    }

    /// Assume one of the role's target roles
    pub async fn assume_role(&self, request: AssumeRoleRequest) -> Result<Secret> {
        self.issue(IssueRequest::AssumeRole(request)).await
    }

    /// Issue a session token
    pub async fn session_token(&self, request: SessionTokenRequest) -> Result<Secret> {
        self.issue(IssueRequest::SessionToken(request)).await
    }

    /// Create an IAM user with an access key
    pub async fn iam_user(&self, request: IamUserRequest) -> Result<Secret> {
        self.issue(IssueRequest::IamUser(request)).await
    }

    /// Renew a lease; `None` for STS credentials
    pub async fn renew(&self, secret: &Secret) -> Result<Option<Secret>> {
        self.leases.renew(secret).await
    }

    /// Revoke a lease
    pub async fn revoke(&self, secret: &mut Secret) -> Result<RevokeOutcome> {
        self.leases.revoke(secret).await
    }

    /// Roll back ledger entries older than the configured grace window
    pub async fn sweep(&self) -> Result<SweepReport> {
        self.wal
            .sweep(
                self.identity.as_ref(),
                self.clock.now(),
                self.config.rollback_min_age,
            )
            .await
    }

    /// Username generator for the current root configuration
    async fn username_generator(&self) -> Result<UsernameGenerator> {
        let root = self.reader.root().await?;
        UsernameGenerator::new(root.username_template())
    }

    /// Resolve the STS lifetime for `role`
    fn sts_ttl(&self, role: &RoleEntry, requested: Option<Duration>) -> Result<Duration> {
        role.resolve_sts_ttl(requested, self.config.default_sts_ttl)
    }
}

fn sts_data(credentials: TemporaryCredentials, arn: Option<String>) -> SecretData {
    SecretData {
        access_key: credentials.access_key_id,
        secret_key: credentials.secret_access_key,
        session_token: Some(credentials.session_token),
        arn,
    }
}
