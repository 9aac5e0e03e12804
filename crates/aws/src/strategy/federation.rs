//! Federation token strategy

use crate::core::{CredentialType, Result, RoleEntry, Secret, SecretMetadata};
use crate::policy;
use crate::traits::FederationTokenInput;
use crate::username::UsernameKind;

use super::{CredentialBroker, FederationTokenRequest, sts_data};

impl CredentialBroker {
    /// `GetFederationToken` scoped by the role's merged policies
    ///
    /// Refuses to issue without a policy document or ARN: an unscoped
    /// federation token carries the broker's own permissions.
    #[tracing::instrument(level = "debug", skip_all, fields(role = %request.role))]
    pub(super) async fn issue_federation_token(
        &self,
        role: &RoleEntry,
        request: &FederationTokenRequest,
    ) -> Result<Secret> {
        let ttl = self.sts_ttl(role, request.ttl)?;
        let effective = policy::effective_policy(self.identity.as_ref(), role).await?;

        let issued_at = self.clock.now();
        let name = self
            .username_generator()
            .await?
            .generate(UsernameKind::FederationToken, "", "", issued_at)?;

        effective.require_scope(CredentialType::FederationToken)?;

        tracing::debug!(name = %name, ttl_secs = ttl.as_secs(), arns = effective.arns.len(), "requesting federation token");
        let credentials = self
            .identity
            .get_federation_token(FederationTokenInput {
                name: name.clone(),
                duration: ttl,
                policy: effective.document.clone(),
                policy_arns: effective.arns,
            })
            .await?;

        let expiration = credentials.expiration;
        Ok(Secret::sts(
            sts_data(credentials, None),
            expiration,
            issued_at,
            SecretMetadata::sts(Some(name), effective.document),
        ))
    }
}
