//! Lease renewal and revocation
//!
//! Dispatch is on the secret's internal metadata:
//!
//! | `is_sts` | renew                          | revoke                      |
//! |----------|--------------------------------|-----------------------------|
//! | `true`   | no-op                          | no-op (provider expires it) |
//! | `false`  | TTLs reset from `config/lease` | IAM user deleted            |
//!
//! Neither path makes a provider call for STS secrets.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ConfigReader;
use crate::core::{CredentialError, LeaseConfig, LeaseState, Result, Secret, SecretMetadata};
use crate::rollback;
use crate::traits::IdentityProvider;

/// What a revocation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// STS credential; nothing to clean up
    Skipped,
    /// IAM user deleted
    Revoked {
        /// Deleted user
        username: String,
    },
}

/// Renews and revokes issued secrets
#[derive(Clone)]
pub struct LeaseCoordinator {
    reader: ConfigReader,
    identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for LeaseCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseCoordinator").finish_non_exhaustive()
    }
}

fn ensure_live(secret: &Secret) -> Result<()> {
    if secret.state.is_terminal() {
        return Err(CredentialError::invalid_request("lease has already been revoked"));
    }
    Ok(())
}

impl LeaseCoordinator {
    /// Create a coordinator
    pub fn new(reader: ConfigReader, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { reader, identity }
    }

    /// Renew a secret
    ///
    /// Returns `None` for STS secrets, which cannot be renewed. Otherwise the
    /// renewed secret carries the current lease configuration.
    #[tracing::instrument(skip_all, fields(is_sts = secret.is_sts()))]
    pub async fn renew(&self, secret: &Secret) -> Result<Option<Secret>> {
        ensure_live(secret)?;
        let Some(lease) = self.renew_metadata(&secret.metadata).await? else {
            return Ok(None);
        };

        let mut renewed = secret.clone();
        renewed.ttl = lease.lease;
        renewed.max_ttl = lease.lease_max;
        renewed.state = LeaseState::Renewed;
        tracing::debug!(ttl_secs = lease.lease.as_secs(), "lease renewed");
        Ok(Some(renewed))
    }

    /// Revoke a secret and mark it revoked
    #[tracing::instrument(skip_all, fields(is_sts = secret.is_sts()))]
    pub async fn revoke(&self, secret: &mut Secret) -> Result<RevokeOutcome> {
        ensure_live(secret)?;
        let outcome = self.revoke_metadata(&secret.metadata).await?;
        secret.state = LeaseState::Revoked;
        Ok(outcome)
    }

    /// Lease to apply when renewing a secret with this metadata
    pub async fn renew_metadata(&self, metadata: &SecretMetadata) -> Result<Option<LeaseConfig>> {
        if metadata.is_sts() {
            return Ok(None);
        }
        self.reader.lease().await.map(Some)
    }

    /// Revoke by metadata alone
    pub async fn revoke_metadata(&self, metadata: &SecretMetadata) -> Result<RevokeOutcome> {
        if metadata.is_sts() {
            return Ok(RevokeOutcome::Skipped);
        }
        let username = metadata.require_username()?;
        rollback::delete_user(self.identity.as_ref(), username).await?;
        tracing::info!(username, "IAM user revoked");
        Ok(RevokeOutcome::Revoked {
            username: username.to_owned(),
        })
    }

    /// Revoke from a stored internal-data record
    ///
    /// Accepts pre-versioning records; a present but non-boolean `is_sts` is
    /// rejected before anything is deleted.
    pub async fn revoke_internal_data(&self, internal: &Value) -> Result<RevokeOutcome> {
        let metadata = SecretMetadata::from_internal_data(internal)?;
        self.revoke_metadata(&metadata).await
    }

    /// Renew from a stored internal-data record
    pub async fn renew_internal_data(&self, internal: &Value) -> Result<Option<LeaseConfig>> {
        let metadata = SecretMetadata::from_internal_data(internal)?;
        self.renew_metadata(&metadata).await
    }
}
