//! IAM user strategy
//!
//! The only strategy that creates a durable principal, and so the only one
//! covered by the rollback ledger:
//!
//! 1. generate the user name
//! 2. write the WAL entry
//! 3. `CreateUser` (on failure: delete the WAL entry, return the error)
//! 4. attach each managed policy
//! 5. put the inline policy, named after the role
//! 6. add to each group
//! 7. tag, when the role has tags
//! 8. create the access key
//! 9. delete the WAL entry
//!
//! A failure in steps 4-9 returns immediately and leaves the entry pending so
//! the sweep deletes the half-provisioned user.

use crate::core::{CredentialError, Result, RoleEntry, Secret, SecretData, SecretMetadata};
use crate::traits::CreateUserInput;
use crate::username::UsernameKind;

use super::{CredentialBroker, IamUserRequest};

impl CredentialBroker {
    #[tracing::instrument(level = "debug", skip_all, fields(role = %request.role, username))]
    pub(super) async fn issue_iam_user(
        &self,
        role: &RoleEntry,
        request: &IamUserRequest,
    ) -> Result<Secret> {
        // read before any mutation so a config failure has no side effect
        let lease = self.reader.lease().await?;
        let issued_at = self.clock.now();
        let username = self.username_generator().await?.generate(
            UsernameKind::IamUser,
            &request.display_name,
            &request.role,
            issued_at,
        )?;
        tracing::Span::current().record("username", username.as_str());

        let wal_id = self.wal.begin(&username, issued_at).await?;

        let created = self
            .identity
            .create_user(CreateUserInput {
                username: username.clone(),
                path: role.user_path().to_owned(),
                permissions_boundary: role.permissions_boundary_arn.clone(),
            })
            .await;
        if let Err(create_error) = created {
            tracing::debug!(error = %create_error, "user creation failed, discarding WAL entry");
            if let Err(source) = self.wal.remove(wal_id).await {
                tracing::warn!(wal_id = %wal_id, error = %source, "WAL entry left behind after failed user creation");
                return Err(CredentialError::LedgerDeleteAfterCreate {
                    id: wal_id,
                    create_error,
                    source,
                });
            }
            return Err(create_error.into());
        }

        for arn in &role.policy_arns {
            self.identity.attach_user_policy(&username, arn).await?;
        }
        if let Some(document) = role.policy_document() {
            self.identity
                .put_user_policy(&username, &request.role, document)
                .await?;
        }
        for group in &role.iam_groups {
            self.identity.add_user_to_group(&username, group).await?;
        }
        if !role.iam_tags.is_empty() {
            self.identity.tag_user(&username, &role.iam_tags).await?;
        }
        let key = self.identity.create_access_key(&username).await?;

        if let Err(err) = self.wal.commit(wal_id).await {
            tracing::warn!(wal_id = %wal_id, error = %err, "user provisioned but WAL entry not removed");
            return Err(err);
        }

        Ok(Secret::iam_user(
            SecretData {
                access_key: key.access_key_id,
                secret_key: key.secret_access_key,
                session_token: None,
                arn: None,
            },
            lease,
            issued_at,
            SecretMetadata::iam_user(username, request.role.clone()),
        ))
    }
}
