//! Role entries
//!
//! A role is the operator-authored binding between a broker endpoint and the
//! IAM/STS scoping applied to every credential issued through it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::{CredentialError, Result};

static USER_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([\x21-\x7F]{0,510}/)?$").unwrap_or_else(|e| panic!("user path pattern: {e}"))
});

/// Kind of credential a role issues
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// Long-lived IAM user with an access key
    #[default]
    IamUser,
    /// STS `AssumeRole` against one of the role's ARNs
    AssumedRole,
    /// STS `GetFederationToken`
    FederationToken,
    /// STS `GetSessionToken` for the broker's own identity
    SessionToken,
}

impl CredentialType {
    /// Wire name (`iam_user`, `assumed_role`, ...)
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IamUser => "iam_user",
            Self::AssumedRole => "assumed_role",
            Self::FederationToken => "federation_token",
            Self::SessionToken => "session_token",
        }
    }

    /// Whether issued credentials are STS tokens (self-expiring, not renewable)
    pub fn is_sts(self) -> bool {
        !matches!(self, Self::IamUser)
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-defined role
///
/// Read once per issuance and never mutated by the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleEntry {
    /// Credential type issued by this role
    pub credential_type: CredentialType,

    /// Managed policy ARNs, attached in order
    pub policy_arns: Vec<String>,

    /// Inline policy document (IAM JSON)
    pub policy_document: Option<String>,

    /// Role ARNs that may be assumed (`assumed_role` only)
    pub role_arns: Vec<String>,

    /// IAM groups whose policies apply to the credential
    pub iam_groups: Vec<String>,

    /// IAM path for created users (defaults to `/`)
    pub user_path: Option<String>,

    /// Permissions boundary for created users
    pub permissions_boundary_arn: Option<String>,

    /// Tags applied to created users
    pub iam_tags: BTreeMap<String, String>,

    /// Default lifetime of STS credentials
    #[serde(with = "humantime_serde")]
    pub default_sts_ttl: Option<Duration>,

    /// Upper bound on requested STS lifetimes
    #[serde(with = "humantime_serde")]
    pub max_sts_ttl: Option<Duration>,

    /// MFA device serial used for session tokens
    pub mfa_serial_number: Option<String>,
}

impl RoleEntry {
    /// Create a role of the given type with no scoping
    pub fn new(credential_type: CredentialType) -> Self {
        Self {
            credential_type,
            ..Self::default()
        }
    }

    /// Add a managed policy ARN
    pub fn with_policy_arn(mut self, arn: impl Into<String>) -> Self {
        self.policy_arns.push(arn.into());
        self
    }

    /// Set the inline policy document
    pub fn with_policy_document(mut self, document: impl Into<String>) -> Self {
        self.policy_document = Some(document.into());
        self
    }

    /// Add an assumable role ARN
    pub fn with_role_arn(mut self, arn: impl Into<String>) -> Self {
        self.role_arns.push(arn.into());
        self
    }

    /// Add an IAM group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.iam_groups.push(group.into());
        self
    }

    /// Add a user tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.iam_tags.insert(key.into(), value.into());
        self
    }

    /// Inline document, ignoring an empty string
    pub fn policy_document(&self) -> Option<&str> {
        self.policy_document.as_deref().filter(|doc| !doc.is_empty())
    }

    /// IAM path for created users
    pub fn user_path(&self) -> &str {
        self.user_path
            .as_deref()
            .filter(|path| !path.is_empty())
            .unwrap_or("/")
    }

    /// Pick the role ARN to assume
    ///
    /// An explicit request must name one of the role's ARNs; without one the
    /// role must have exactly one.
    pub fn resolve_role_arn(&self, requested: Option<&str>) -> Result<String> {
        match requested {
            Some(arn) if self.role_arns.iter().any(|allowed| allowed == arn) => Ok(arn.to_owned()),
            Some(arn) => Err(CredentialError::invalid_request(format!(
                "role_arn '{arn}' is not allowed by this role"
            ))),
            None => match self.role_arns.as_slice() {
                [single] => Ok(single.clone()),
                [] => Err(CredentialError::invalid_request(
                    "role has no role_arns configured",
                )),
                _ => Err(CredentialError::invalid_request(
                    "role has multiple role_arns; role_arn must be specified",
                )),
            },
        }
    }

    /// Lifetime for an STS credential
    ///
    /// Requested TTL, else the role default, else `fallback`. A requested TTL
    /// above `max_sts_ttl` is rejected rather than clamped.
    pub fn resolve_sts_ttl(&self, requested: Option<Duration>, fallback: Duration) -> Result<Duration> {
        let ttl = requested.or(self.default_sts_ttl).unwrap_or(fallback);
        if let Some(max) = self.max_sts_ttl
            && ttl > max
        {
            return Err(CredentialError::invalid_request(format!(
                "requested ttl of {}s exceeds the role's max_sts_ttl of {}s",
                ttl.as_secs(),
                max.as_secs()
            )));
        }
        Ok(ttl)
    }

    /// Check internal consistency of the role for its credential type
    pub fn validate(&self) -> Result<()> {
        fn invalid(reason: impl Into<String>) -> CredentialError {
            CredentialError::invalid_request(reason)
        }

        let user_only = self.user_path.is_some()
            || self.permissions_boundary_arn.is_some()
            || !self.iam_tags.is_empty();
        let has_sts_ttl = self.default_sts_ttl.is_some() || self.max_sts_ttl.is_some();

        match self.credential_type {
            CredentialType::IamUser => {
                if !self.role_arns.is_empty() {
                    return Err(invalid("role_arns are only valid for assumed_role"));
                }
                if has_sts_ttl {
                    return Err(invalid(
                        "default_sts_ttl and max_sts_ttl are not valid for iam_user",
                    ));
                }
            }
            CredentialType::AssumedRole => {
                if self.role_arns.is_empty() {
                    return Err(invalid("assumed_role requires at least one role_arn"));
                }
            }
            CredentialType::FederationToken => {
                if !self.role_arns.is_empty() {
                    return Err(invalid("role_arns are only valid for assumed_role"));
                }
            }
            CredentialType::SessionToken => {
                if !self.policy_arns.is_empty()
                    || self.policy_document().is_some()
                    || !self.iam_groups.is_empty()
                    || !self.role_arns.is_empty()
                {
                    return Err(invalid(
                        "session_token roles cannot carry policies, groups or role_arns",
                    ));
                }
            }
        }

        if self.credential_type != CredentialType::IamUser && user_only {
            return Err(invalid(
                "user_path, permissions_boundary_arn and iam_tags are only valid for iam_user",
            ));
        }
        if self.credential_type != CredentialType::SessionToken
            && self.mfa_serial_number.is_some()
        {
            return Err(invalid("mfa_serial_number is only valid for session_token"));
        }

        if let Some(path) = &self.user_path
            && !USER_PATH.is_match(path)
        {
            return Err(invalid(format!(
                "user_path '{path}' must begin and end with '/' and contain printable ASCII"
            )));
        }
        if let Some(boundary) = &self.permissions_boundary_arn
            && !boundary.starts_with("arn:")
        {
            return Err(invalid(format!(
                "permissions_boundary_arn '{boundary}' is not an ARN"
            )));
        }
        if let (Some(default), Some(max)) = (self.default_sts_ttl, self.max_sts_ttl)
            && default > max
        {
            return Err(invalid("default_sts_ttl cannot exceed max_sts_ttl"));
        }
        if let Some(document) = self.policy_document()
            && let Err(err) = serde_json::from_str::<serde_json::Value>(document)
        {
            return Err(invalid(format!("policy_document is not valid JSON: {err}")));
        }

        Ok(())
    }
}
