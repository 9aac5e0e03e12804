//! Effective policy computation
//!
//! A role's own scoping (inline document + managed ARNs) is extended with the
//! policies of its IAM groups. Group ARNs are appended to the role's ARNs;
//! group inline documents are combined with the role's document into a
//! single document by taking the union of their statements.

use serde::Serialize;
use serde_json::Value;

use crate::core::{CredentialError, CredentialType, Result, RoleEntry};
use crate::traits::{GroupPolicies, IdentityProvider};

/// IAM policy language version of combined documents
pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Serialize)]
struct PolicyDocument {
    #[serde(rename = "Version")]
    version: &'static str,
    #[serde(rename = "Statement")]
    statement: Vec<Value>,
}

/// Scoping applied to an issued credential
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectivePolicy {
    /// Inline or session policy document
    pub document: Option<String>,
    /// Managed policy ARNs, role ARNs first
    pub arns: Vec<String>,
}

impl EffectivePolicy {
    /// Whether anything restricts the credential
    pub fn is_scoped(&self) -> bool {
        self.document.is_some() || !self.arns.is_empty()
    }

    /// Fail closed when nothing restricts the credential
    ///
    /// Federation tokens issued without a policy would carry the broker's
    /// own permissions.
    pub fn require_scope(&self, credential_type: CredentialType) -> Result<()> {
        if self.is_scoped() {
            Ok(())
        } else {
            Err(CredentialError::InsufficientPolicy { credential_type })
        }
    }
}

/// Combine policy documents into one by concatenating their statements
///
/// Empty documents are skipped. Returns `None` when the documents hold no
/// statements at all.
pub fn combine_policy_documents<'a>(
    documents: impl IntoIterator<Item = &'a str>,
) -> Result<Option<String>> {
    let mut statement = Vec::new();
    for document in documents {
        if document.trim().is_empty() {
            continue;
        }
        let parsed: Value = serde_json::from_str(document).map_err(|e| {
            CredentialError::PolicyInvalid {
                reason: e.to_string(),
            }
        })?;
        let Value::Object(mut fields) = parsed else {
            return Err(CredentialError::PolicyInvalid {
                reason: "policy document is not a JSON object".into(),
            });
        };
        match fields.remove("Statement") {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => statement.extend(items),
            Some(item @ Value::Object(_)) => statement.push(item),
            Some(other) => {
                return Err(CredentialError::PolicyInvalid {
                    reason: format!("Statement must be an object or an array, got {other}"),
                });
            }
        }
    }

    if statement.is_empty() {
        return Ok(None);
    }
    let combined = PolicyDocument {
        version: POLICY_VERSION,
        statement,
    };
    serde_json::to_string(&combined)
        .map(Some)
        .map_err(|e| CredentialError::PolicyInvalid {
            reason: e.to_string(),
        })
}

/// Merge a role's scoping with the policies of its groups
///
/// Without group documents the role document is used verbatim.
pub fn merge(
    role_document: Option<&str>,
    role_arns: &[String],
    groups: &[GroupPolicies],
) -> Result<EffectivePolicy> {
    let mut arns = role_arns.to_vec();
    arns.extend(groups.iter().flat_map(|group| group.arns.iter().cloned()));

    let group_documents: Vec<&str> = groups
        .iter()
        .flat_map(|group| group.documents.iter().map(String::as_str))
        .collect();

    let document = if group_documents.is_empty() {
        role_document.map(str::to_owned)
    } else {
        combine_policy_documents(group_documents.into_iter().chain(role_document))?
    };

    Ok(EffectivePolicy { document, arns })
}

/// Read the role's group policies from the provider and merge them
#[tracing::instrument(level = "debug", skip(identity, role), fields(groups = role.iam_groups.len()))]
pub async fn effective_policy(
    identity: &dyn IdentityProvider,
    role: &RoleEntry,
) -> Result<EffectivePolicy> {
    let mut groups = Vec::with_capacity(role.iam_groups.len());
    for group in &role.iam_groups {
        groups.push(identity.group_policies(group).await?);
    }
    merge(role.policy_document(), &role.policy_arns, &groups)
}
