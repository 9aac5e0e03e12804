//! Assumed role strategy

use crate::core::{CredentialType, Result, RoleEntry, Secret, SecretMetadata};
use crate::policy;
use crate::traits::AssumeRoleInput;
use crate::username::{self, UsernameKind};

use super::{AssumeRoleRequest, CredentialBroker, sts_data};

impl CredentialBroker {
    /// `AssumeRole` against one of the role's target ARNs
    ///
    /// The merged policy document and ARNs become session policies. A role
    /// that contributes neither is refused, so a session never carries the
    /// target role's full permissions unscoped.
    #[tracing::instrument(level = "debug", skip_all, fields(role = %request.role))]
    pub(super) async fn issue_assumed_role(
        &self,
        role: &RoleEntry,
        request: &AssumeRoleRequest,
    ) -> Result<Secret> {
        let ttl = self.sts_ttl(role, request.ttl)?;
        let effective = policy::effective_policy(self.identity.as_ref(), role).await?;
        effective.require_scope(CredentialType::AssumedRole)?;
        let role_arn = role.resolve_role_arn(request.role_arn.as_deref())?;

        let issued_at = self.clock.now();
        let session_name = match request.role_session_name.as_deref() {
            Some(explicit) if !explicit.is_empty() => username::explicit_session_name(explicit),
            _ => self.username_generator().await?.generate(
                UsernameKind::AssumeRole,
                &request.display_name,
                &request.role,
                issued_at,
            )?,
        };

        tracing::debug!(role_arn = %role_arn, session_name = %session_name, ttl_secs = ttl.as_secs(), "assuming role");
        let assumed = self
            .identity
            .assume_role(AssumeRoleInput {
                role_arn: role_arn.clone(),
                role_session_name: session_name.clone(),
                duration: ttl,
                policy: effective.document,
                policy_arns: effective.arns,
            })
            .await?;

        let expiration = assumed.credentials.expiration;
        Ok(Secret::sts(
            sts_data(assumed.credentials, Some(assumed.arn)),
            expiration,
            issued_at,
            SecretMetadata::sts(Some(session_name), Some(role_arn)),
        ))
    }
}
