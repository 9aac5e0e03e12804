//! IAM user teardown
//!
//! Shared by lease revocation and the WAL sweep. Keyed by username alone, so
//! it works for fully provisioned users and for users abandoned at any step of
//! issuance. A user (or any attachment) that is already gone counts as
//! deleted, which makes the teardown safe to repeat.

use crate::core::ProviderError;
use crate::traits::IdentityProvider;

fn tolerate_missing(result: Result<(), ProviderError>) -> Result<(), ProviderError> {
    match result {
        Err(err) if err.is_not_found() => Ok(()),
        other => other,
    }
}

/// Delete an IAM user and everything attached to it
///
/// Order: group memberships, access keys, inline policies, attached managed
/// policies, then the user.
#[tracing::instrument(level = "debug", skip(identity))]
pub async fn delete_user(identity: &dyn IdentityProvider, username: &str) -> Result<(), ProviderError> {
    let groups = match identity.list_groups_for_user(username).await {
        Ok(groups) => groups,
        Err(err) if err.is_not_found() => {
            tracing::debug!(username, "user already deleted");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    for group in &groups {
        tolerate_missing(identity.remove_user_from_group(username, group).await)?;
    }

    for access_key_id in identity.list_access_keys(username).await? {
        tolerate_missing(identity.delete_access_key(username, &access_key_id).await)?;
    }

    for policy_name in identity.list_user_policies(username).await? {
        tolerate_missing(identity.delete_user_policy(username, &policy_name).await)?;
    }

    for policy_arn in identity.list_attached_user_policies(username).await? {
        tolerate_missing(identity.detach_user_policy(username, &policy_arn).await)?;
    }

    tolerate_missing(identity.delete_user(username).await)?;
    tracing::debug!(username, groups = groups.len(), "user deleted");
    Ok(())
}
