//! Issued secrets and their internal lease metadata
//!
//! A [`Secret`] carries three groups of fields:
//! - public credential material returned to the caller ([`SecretData`])
//! - lease fields (`ttl`, `max_ttl`, `renewable`, [`LeaseState`])
//! - internal metadata ([`SecretMetadata`]) that renew/revoke dispatch on and
//!   that is never returned to the caller
//!
//! The internal metadata is persisted by the lease store (outside this crate)
//! as a versioned JSON record:
//!
//! ```json
//! {"version": 1, "is_sts": false, "username": "nebula-alice-ro-1700000000-abc", "policy": "readonly"}
//! ```
//!
//! Records written before versioning (no `version` field) decode as version 0;
//! a missing `is_sts` means an IAM user lease.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::config::LeaseConfig;
use super::error::{CredentialError, Result};
use crate::utils::SecretString;

/// Current version of the internal metadata record
pub const SECRET_METADATA_VERSION: u32 = 1;

/// Which lease contract a secret follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseKind {
    /// STS token: provider-expiring, never renewed or revoked by the broker
    Sts,
    /// IAM user: renewable lease, revoked by deleting the user
    IamUser,
}

/// Lease lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
    /// Freshly issued
    Active,
    /// Renewed at least once
    Renewed,
    /// Revoked (terminal)
    Revoked,
}

impl LeaseState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        self == Self::Revoked
    }
}

/// Typed internal metadata of an issued secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMetadata {
    /// Record version this value was decoded from (or will be written as)
    pub version: u32,
    /// Lease contract
    pub kind: LeaseKind,
    /// IAM user name, federated user name, or role session name
    pub username: Option<String>,
    /// Policy document, assumed role ARN, or role name that scoped the secret
    pub policy: Option<String>,
}

impl SecretMetadata {
    /// Metadata for an STS credential
    pub fn sts(username: Option<String>, policy: Option<String>) -> Self {
        Self {
            version: SECRET_METADATA_VERSION,
            kind: LeaseKind::Sts,
            username,
            policy,
        }
    }

    /// Metadata for an IAM user credential
    pub fn iam_user(username: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            version: SECRET_METADATA_VERSION,
            kind: LeaseKind::IamUser,
            username: Some(username.into()),
            policy: Some(role.into()),
        }
    }

    /// Whether the secret is an STS token
    pub fn is_sts(&self) -> bool {
        self.kind == LeaseKind::Sts
    }

    /// Username required for revocation
    pub fn require_username(&self) -> Result<&str> {
        self.username
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| CredentialError::malformed("secret is missing username internal data"))
    }

    /// Encode as the versioned internal-data record
    pub fn to_internal_data(&self) -> Value {
        let mut map = Map::new();
        map.insert("version".into(), Value::from(SECRET_METADATA_VERSION));
        map.insert("is_sts".into(), Value::Bool(self.is_sts()));
        if let Some(username) = &self.username {
            map.insert("username".into(), Value::String(username.clone()));
        }
        if let Some(policy) = &self.policy {
            map.insert("policy".into(), Value::String(policy.clone()));
        }
        Value::Object(map)
    }

    /// Decode an internal-data record, including pre-versioning records
    ///
    /// `is_sts` absent means an IAM user lease; `is_sts` present with a
    /// non-boolean value is [`CredentialError::MalformedSecretMetadata`], as
    /// is a non-string `username`. A non-string `policy` (older records stored
    /// the whole role entry there) is kept as its JSON text.
    pub fn from_internal_data(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| CredentialError::malformed("internal data is not an object"))?;

        let version = match map.get("version") {
            None => 0,
            Some(raw) => raw
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| CredentialError::malformed("version is not an integer"))?,
        };
        if version > SECRET_METADATA_VERSION {
            return Err(CredentialError::malformed(format!(
                "unsupported internal data version {version}"
            )));
        }

        let kind = match map.get("is_sts") {
            None => LeaseKind::IamUser,
            Some(Value::Bool(true)) => LeaseKind::Sts,
            Some(Value::Bool(false)) => LeaseKind::IamUser,
            Some(_) => {
                return Err(CredentialError::malformed(
                    "secret has is_sts but value could not be understood",
                ));
            }
        };

        let username = match map.get("username") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => {
                return Err(CredentialError::malformed(
                    "secret has username but value is not a string",
                ));
            }
        };

        let policy = match map.get("policy") {
            None | Some(Value::Null) => None,
            Some(Value::String(policy)) => Some(policy.clone()),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            version,
            kind,
            username,
            policy,
        })
    }
}

impl Serialize for SecretMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_internal_data().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_internal_data(&value).map_err(D::Error::custom)
    }
}

/// Credential material returned to the caller
#[derive(Debug, Clone)]
pub struct SecretData {
    /// Access key ID
    pub access_key: String,
    /// Secret access key
    pub secret_key: SecretString,
    /// Session token (STS only)
    pub session_token: Option<SecretString>,
    /// Assumed role user ARN (assumed_role only)
    pub arn: Option<String>,
}

/// Result of an issuance
#[derive(Debug, Clone)]
pub struct Secret {
    /// Public credential material
    pub data: SecretData,
    /// Lease TTL
    pub ttl: Duration,
    /// Lease maximum lifetime
    pub max_ttl: Duration,
    /// Whether the lease may be renewed
    pub renewable: bool,
    /// Issuance time
    pub issued_at: DateTime<Utc>,
    /// Lifecycle state
    pub state: LeaseState,
    /// Internal metadata, not returned to the caller
    pub metadata: SecretMetadata,
}

impl Secret {
    /// Secret for an STS credential
    ///
    /// TTL is exactly the provider expiration minus issuance time (zero if the
    /// token already expired); STS secrets are never renewable.
    pub fn sts(
        data: SecretData,
        expiration: DateTime<Utc>,
        issued_at: DateTime<Utc>,
        metadata: SecretMetadata,
    ) -> Self {
        let ttl = (expiration - issued_at).to_std().unwrap_or(Duration::ZERO);
        Self {
            data,
            ttl,
            max_ttl: ttl,
            renewable: false,
            issued_at,
            state: LeaseState::Active,
            metadata,
        }
    }

    /// Secret for an IAM user credential, leased per `lease`
    pub fn iam_user(
        data: SecretData,
        lease: LeaseConfig,
        issued_at: DateTime<Utc>,
        metadata: SecretMetadata,
    ) -> Self {
        Self {
            data,
            ttl: lease.lease,
            max_ttl: lease.lease_max,
            renewable: true,
            issued_at,
            state: LeaseState::Active,
            metadata,
        }
    }

    /// Whether the secret is an STS token
    pub fn is_sts(&self) -> bool {
        self.metadata.is_sts()
    }

    /// Internal data record for the lease store
    pub fn internal_data(&self) -> Value {
        self.metadata.to_internal_data()
    }

    /// Public response fields
    ///
    /// `security_token` is the deprecated alias of `session_token` and is only
    /// present when a session token is.
    pub fn response_data(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("access_key".into(), Value::String(self.data.access_key.clone()));
        map.insert(
            "secret_key".into(),
            Value::String(self.data.secret_key.expose_secret(str::to_owned)),
        );
        match &self.data.session_token {
            Some(token) => {
                let token = token.expose_secret(str::to_owned);
                map.insert("security_token".into(), Value::String(token.clone()));
                map.insert("session_token".into(), Value::String(token));
            }
            None => {
                map.insert("session_token".into(), Value::Null);
            }
        }
        if let Some(arn) = &self.data.arn {
            map.insert("arn".into(), Value::String(arn.clone()));
        }
        if self.is_sts() {
            map.insert("ttl".into(), Value::from(self.ttl.as_secs()));
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data(session: bool) -> SecretData {
        SecretData {
            access_key: "AKIAEXAMPLE".into(),
            secret_key: SecretString::new("shh"),
            session_token: session.then(|| SecretString::new("token")),
            arn: None,
        }
    }

    #[test]
    fn test_sts_ttl_is_exact() {
        let issued = Utc::now();
        let expiration = issued + TimeDelta::seconds(3600);
        let secret = Secret::sts(data(true), expiration, issued, SecretMetadata::sts(None, None));
        assert_eq!(secret.ttl, Duration::from_secs(3600));
        assert!(!secret.renewable);
        assert!(secret.is_sts());
    }

    #[test]
    fn test_sts_ttl_never_negative() {
        let issued = Utc::now();
        let secret = Secret::sts(
            data(true),
            issued - TimeDelta::seconds(5),
            issued,
            SecretMetadata::sts(None, None),
        );
        assert_eq!(secret.ttl, Duration::ZERO);
    }

    #[test]
    fn test_iam_user_takes_lease() {
        let lease = LeaseConfig::new(Duration::from_secs(60), Duration::from_secs(600));
        let secret = Secret::iam_user(
            data(false),
            lease,
            Utc::now(),
            SecretMetadata::iam_user("alice", "readonly"),
        );
        assert!(secret.renewable);
        assert_eq!(secret.ttl, Duration::from_secs(60));
        assert_eq!(secret.max_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_response_data_fields() {
        let issued = Utc::now();
        let secret = Secret::sts(
            data(true),
            issued + TimeDelta::seconds(10),
            issued,
            SecretMetadata::sts(Some("fed".into()), None),
        );
        let response = secret.response_data();
        assert_eq!(response["access_key"], json!("AKIAEXAMPLE"));
        assert_eq!(response["secret_key"], json!("shh"));
        assert_eq!(response["session_token"], json!("token"));
        assert_eq!(response["security_token"], json!("token"));
        assert_eq!(response["ttl"], json!(10));
        assert!(!response.contains_key("username"));

        let iam = Secret::iam_user(
            data(false),
            LeaseConfig::default(),
            issued,
            SecretMetadata::iam_user("alice", "readonly"),
        );
        let response = iam.response_data();
        assert_eq!(response["session_token"], Value::Null);
        assert!(!response.contains_key("security_token"));
    }

    #[test]
    fn test_internal_data_round_trip() {
        let metadata = SecretMetadata::iam_user("alice", "readonly");
        let value = metadata.to_internal_data();
        assert_eq!(
            value,
            json!({"version": 1, "is_sts": false, "username": "alice", "policy": "readonly"})
        );
        assert_eq!(SecretMetadata::from_internal_data(&value).unwrap(), metadata);
    }

    #[test]
    fn test_legacy_record_without_is_sts_is_iam_user() {
        let metadata =
            SecretMetadata::from_internal_data(&json!({"username": "legacy-user"})).unwrap();
        assert_eq!(metadata.kind, LeaseKind::IamUser);
        assert_eq!(metadata.version, 0);
        assert_eq!(metadata.require_username().unwrap(), "legacy-user");
    }

    #[test]
    fn test_malformed_is_sts_is_distinct_error() {
        let err = SecretMetadata::from_internal_data(&json!({"is_sts": "yes"})).unwrap_err();
        match err {
            CredentialError::MalformedSecretMetadata { reason } => {
                assert!(reason.contains("is_sts"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_legacy_policy_object_kept_as_text() {
        let metadata = SecretMetadata::from_internal_data(&json!({
            "is_sts": false,
            "username": "u",
            "policy": {"policy_arns": ["arn:x"]}
        }))
        .unwrap();
        assert!(metadata.policy.unwrap().contains("arn:x"));
    }

    #[test]
    fn test_future_version_rejected() {
        let err = SecretMetadata::from_internal_data(&json!({"version": 99, "is_sts": true}));
        assert!(matches!(
            err,
            Err(CredentialError::MalformedSecretMetadata { .. })
        ));
    }

    #[test]
    fn test_missing_username() {
        let metadata = SecretMetadata::from_internal_data(&json!({"is_sts": false})).unwrap();
        assert!(matches!(
            metadata.require_username(),
            Err(CredentialError::MalformedSecretMetadata { .. })
        ));
    }

    #[test]
    fn test_serde_uses_internal_record() {
        let metadata: SecretMetadata =
            serde_json::from_value(json!({"is_sts": true, "username": "s"})).unwrap();
        assert!(metadata.is_sts());
        assert!(serde_json::from_value::<SecretMetadata>(json!({"is_sts": 1})).is_err());
    }
}
