//! Session token strategy

use crate::core::{Result, RoleEntry, Secret, SecretMetadata};
use crate::traits::SessionTokenInput;

use super::{CredentialBroker, SessionTokenRequest, sts_data};

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|v| !v.is_empty()).map(str::to_owned)
}

impl CredentialBroker {
    /// `GetSessionToken` for the broker's own identity
    ///
    /// A serial number without a token code is passed through as is. STS then
    /// issues credentials that work for every resource whose policy does not
    /// require `aws:MultiFactorAuthPresent`, and are denied on those that do.
    /// Policies commonly mix both kinds of permission, so this is not treated
    /// as an error.
    #[tracing::instrument(level = "debug", skip_all, fields(role = %request.role))]
    pub(super) async fn issue_session_token(
        &self,
        role: &RoleEntry,
        request: &SessionTokenRequest,
    ) -> Result<Secret> {
        let ttl = self.sts_ttl(role, request.ttl)?;
        let serial_number = non_empty(request.serial_number.as_deref())
            .or_else(|| non_empty(role.mfa_serial_number.as_deref()));
        let token_code = non_empty(request.token_code.as_deref());

        if serial_number.is_some() && token_code.is_none() {
            tracing::warn!(
                "MFA serial number configured without a token code; credentials will not satisfy MFA conditions"
            );
        }

        let issued_at = self.clock.now();
        let credentials = self
            .identity
            .get_session_token(SessionTokenInput {
                duration: ttl,
                serial_number,
                token_code,
            })
            .await?;

        let expiration = credentials.expiration;
        Ok(Secret::sts(
            sts_data(credentials, None),
            expiration,
            issued_at,
            SecretMetadata::sts(None, None),
        ))
    }
}
