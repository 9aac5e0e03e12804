//! Collaborator traits

mod clock;
pub mod identity;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use identity::{
    AccessKey, AssumeRoleInput, AssumedRole, CreateUserInput, FederationTokenInput,
    GroupPolicies, IdentityProvider, SessionTokenInput, TemporaryCredentials,
};
pub use storage::{Storage, get_json, put_json};
