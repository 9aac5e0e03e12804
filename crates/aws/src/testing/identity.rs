//! Recording identity provider for tests

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use parking_lot::Mutex;

use crate::core::{Operation, ProviderError, ProviderErrorKind};
use crate::traits::{
    AccessKey, AssumeRoleInput, AssumedRole, Clock, CreateUserInput, FederationTokenInput,
    GroupPolicies, IdentityProvider, SessionTokenInput, SystemClock, TemporaryCredentials,
};
use crate::utils::SecretString;

/// A recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation invoked
    pub operation: Operation,
    /// User, group or role the call targeted
    pub target: String,
}

/// Provider-side state of a fake IAM user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FakeUser {
    /// IAM path the user was created under
    pub path: String,
    /// Permissions boundary ARN
    pub permissions_boundary: Option<String>,
    /// Attached managed policy ARNs, in attach order
    pub attached_policies: Vec<String>,
    /// Inline policy documents by policy name
    pub inline_policies: BTreeMap<String, String>,
    /// Group memberships, in join order
    pub groups: Vec<String>,
    /// User tags
    pub tags: BTreeMap<String, String>,
    /// Access key IDs
    pub access_keys: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    users: BTreeMap<String, FakeUser>,
    groups: BTreeMap<String, GroupPolicies>,
    calls: Vec<Call>,
    failures: HashMap<Operation, (ProviderErrorKind, bool)>,
    federation_inputs: Vec<FederationTokenInput>,
    assume_role_inputs: Vec<AssumeRoleInput>,
    session_token_inputs: Vec<SessionTokenInput>,
    next_key: u32,
}

/// In-memory IAM/STS provider that records every call
///
/// Keeps user state so teardown can be verified, and fails any operation on
/// demand. STS expirations are `clock.now() + requested duration`.
pub struct FakeIdentityProvider {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for FakeIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIdentityProvider {
    /// Create a provider with no users or groups, using the wall clock
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Compute STS expirations from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fail every call to `operation` until cleared
    pub fn fail(&self, operation: Operation, kind: ProviderErrorKind) {
        self.state.lock().failures.insert(operation, (kind, false));
    }

    /// Fail the next call to `operation` only
    pub fn fail_next(&self, operation: Operation, kind: ProviderErrorKind) {
        self.state.lock().failures.insert(operation, (kind, true));
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Define a group and its policies
    pub fn add_group(&self, name: impl Into<String>, policies: GroupPolicies) {
        self.state.lock().groups.insert(name.into(), policies);
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    /// Operations called so far, in order
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().calls.iter().map(|call| call.operation).collect()
    }

    /// Number of calls made so far
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Forget recorded calls and inputs
    pub fn reset_calls(&self) {
        let mut state = self.state.lock();
        state.calls.clear();
        state.federation_inputs.clear();
        state.assume_role_inputs.clear();
        state.session_token_inputs.clear();
    }

    /// Current state of a user
    pub fn user(&self, username: &str) -> Option<FakeUser> {
        self.state.lock().users.get(username).cloned()
    }

    /// Names of all existing users
    pub fn usernames(&self) -> Vec<String> {
        self.state.lock().users.keys().cloned().collect()
    }

    /// Last `GetFederationToken` input
    pub fn last_federation_token_input(&self) -> Option<FederationTokenInput> {
        self.state.lock().federation_inputs.last().cloned()
    }

    /// Last `AssumeRole` input
    pub fn last_assume_role_input(&self) -> Option<AssumeRoleInput> {
        self.state.lock().assume_role_inputs.last().cloned()
    }

    /// Last `GetSessionToken` input
    pub fn last_session_token_input(&self) -> Option<SessionTokenInput> {
        self.state.lock().session_token_inputs.last().cloned()
    }

    /// Record the call and return the injected failure, if any
    fn enter(&self, state: &mut State, operation: Operation, target: &str) -> Result<(), ProviderError> {
        state.calls.push(Call {
            operation,
            target: target.to_owned(),
        });
        let Some(&(kind, once)) = state.failures.get(&operation) else {
            return Ok(());
        };
        if once {
            state.failures.remove(&operation);
        }
        Err(ProviderError::new(operation, kind, "injected failure").with_code("Injected"))
    }

    fn user_mut<'a>(
        state: &'a mut State,
        operation: Operation,
        username: &str,
    ) -> Result<&'a mut FakeUser, ProviderError> {
        state.users.get_mut(username).ok_or_else(|| {
            ProviderError::new(
                operation,
                ProviderErrorKind::NotFound,
                format!("The user with name {username} cannot be found."),
            )
            .with_code("NoSuchEntity")
        })
    }

    fn temporary_credentials(&self, state: &mut State, duration: std::time::Duration) -> TemporaryCredentials {
        state.next_key += 1;
        let lifetime = TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero());
        TemporaryCredentials {
            access_key_id: format!("ASIAFAKE{:08}", state.next_key),
            secret_access_key: SecretString::new(format!("sts-secret-{}", state.next_key)),
            session_token: SecretString::new(format!("session-token-{}", state.next_key)),
            expiration: self.clock.now() + lifetime,
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn create_user(&self, input: CreateUserInput) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::CreateUser, &input.username)?;
        if state.users.contains_key(&input.username) {
            return Err(ProviderError::new(
                Operation::CreateUser,
                ProviderErrorKind::Conflict,
                format!("User with name {} already exists.", input.username),
            )
            .with_code("EntityAlreadyExists"));
        }
        state.users.insert(
            input.username,
            FakeUser {
                path: input.path,
                permissions_boundary: input.permissions_boundary,
                ..FakeUser::default()
            },
        );
        Ok(())
    }

    async fn attach_user_policy(&self, username: &str, policy_arn: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::AttachUserPolicy, username)?;
        let user = Self::user_mut(&mut state, Operation::AttachUserPolicy, username)?;
        if !user.attached_policies.iter().any(|arn| arn == policy_arn) {
            user.attached_policies.push(policy_arn.to_owned());
        }
        Ok(())
    }

    async fn put_user_policy(
        &self,
        username: &str,
        policy_name: &str,
        document: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::PutUserPolicy, username)?;
        let user = Self::user_mut(&mut state, Operation::PutUserPolicy, username)?;
        user.inline_policies
            .insert(policy_name.to_owned(), document.to_owned());
        Ok(())
    }

    async fn add_user_to_group(&self, username: &str, group: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::AddUserToGroup, username)?;
        if !state.groups.contains_key(group) {
            return Err(ProviderError::new(
                Operation::AddUserToGroup,
                ProviderErrorKind::NotFound,
                format!("The group with name {group} cannot be found."),
            )
            .with_code("NoSuchEntity"));
        }
        let user = Self::user_mut(&mut state, Operation::AddUserToGroup, username)?;
        user.groups.push(group.to_owned());
        Ok(())
    }

    async fn tag_user(
        &self,
        username: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::TagUser, username)?;
        let user = Self::user_mut(&mut state, Operation::TagUser, username)?;
        user.tags.extend(tags.clone());
        Ok(())
    }

    async fn create_access_key(&self, username: &str) -> Result<AccessKey, ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::CreateAccessKey, username)?;
        state.next_key += 1;
        let id = format!("AKIAFAKE{:08}", state.next_key);
        let secret = format!("iam-secret-{}", state.next_key);
        let user = Self::user_mut(&mut state, Operation::CreateAccessKey, username)?;
        user.access_keys.push(id.clone());
        Ok(AccessKey {
            access_key_id: id,
            secret_access_key: SecretString::new(secret),
        })
    }

    async fn list_groups_for_user(&self, username: &str) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::ListGroupsForUser, username)?;
        Ok(Self::user_mut(&mut state, Operation::ListGroupsForUser, username)?
            .groups
            .clone())
    }

    async fn remove_user_from_group(&self, username: &str, group: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::RemoveUserFromGroup, username)?;
        let user = Self::user_mut(&mut state, Operation::RemoveUserFromGroup, username)?;
        user.groups.retain(|g| g != group);
        Ok(())
    }

    async fn list_access_keys(&self, username: &str) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::ListAccessKeys, username)?;
        Ok(Self::user_mut(&mut state, Operation::ListAccessKeys, username)?
            .access_keys
            .clone())
    }

    async fn delete_access_key(&self, username: &str, access_key_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::DeleteAccessKey, username)?;
        let user = Self::user_mut(&mut state, Operation::DeleteAccessKey, username)?;
        user.access_keys.retain(|key| key != access_key_id);
        Ok(())
    }

    async fn list_user_policies(&self, username: &str) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::ListUserPolicies, username)?;
        Ok(Self::user_mut(&mut state, Operation::ListUserPolicies, username)?
            .inline_policies
            .keys()
            .cloned()
            .collect())
    }

    async fn delete_user_policy(&self, username: &str, policy_name: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::DeleteUserPolicy, username)?;
        let user = Self::user_mut(&mut state, Operation::DeleteUserPolicy, username)?;
        user.inline_policies.remove(policy_name);
        Ok(())
    }

    async fn list_attached_user_policies(&self, username: &str) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::ListAttachedUserPolicies, username)?;
        Ok(Self::user_mut(&mut state, Operation::ListAttachedUserPolicies, username)?
            .attached_policies
            .clone())
    }

    async fn detach_user_policy(&self, username: &str, policy_arn: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::DetachUserPolicy, username)?;
        let user = Self::user_mut(&mut state, Operation::DetachUserPolicy, username)?;
        user.attached_policies.retain(|arn| arn != policy_arn);
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::DeleteUser, username)?;
        let user = Self::user_mut(&mut state, Operation::DeleteUser, username)?;
        if !user.groups.is_empty()
            || !user.access_keys.is_empty()
            || !user.inline_policies.is_empty()
            || !user.attached_policies.is_empty()
        {
            return Err(ProviderError::new(
                Operation::DeleteUser,
                ProviderErrorKind::Conflict,
                "Cannot delete entity, must remove attachments first.",
            )
            .with_code("DeleteConflict"));
        }
        state.users.remove(username);
        Ok(())
    }

    async fn group_policies(&self, group: &str) -> Result<GroupPolicies, ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::GetGroupPolicies, group)?;
        state.groups.get(group).cloned().ok_or_else(|| {
            ProviderError::new(
                Operation::GetGroupPolicies,
                ProviderErrorKind::NotFound,
                format!("The group with name {group} cannot be found."),
            )
            .with_code("NoSuchEntity")
        })
    }

    async fn assume_role(&self, input: AssumeRoleInput) -> Result<AssumedRole, ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::AssumeRole, &input.role_arn)?;
        let credentials = self.temporary_credentials(&mut state, input.duration);
        let role_name = input.role_arn.rsplit('/').next().unwrap_or_default().to_owned();
        let account = input.role_arn.split(':').nth(4).unwrap_or_default().to_owned();
        let arn = format!(
            "arn:aws:sts::{account}:assumed-role/{role_name}/{}",
            input.role_session_name
        );
        state.assume_role_inputs.push(input);
        Ok(AssumedRole { credentials, arn })
    }

    async fn get_federation_token(
        &self,
        input: FederationTokenInput,
    ) -> Result<TemporaryCredentials, ProviderError> {
        let mut state = self.state.lock();
        self.enter(&mut state, Operation::GetFederationToken, &input.name)?;
        let credentials = self.temporary_credentials(&mut state, input.duration);
        state.federation_inputs.push(input);
        Ok(credentials)
    }

    async fn get_session_token(
        &self,
        input: SessionTokenInput,
    ) -> Result<TemporaryCredentials, ProviderError> {
        let mut state = self.state.lock();
        let target = input.serial_number.clone().unwrap_or_default();
        self.enter(&mut state, Operation::GetSessionToken, &target)?;
        let credentials = self.temporary_credentials(&mut state, input.duration);
        state.session_token_inputs.push(input);
        Ok(credentials)
    }
}
