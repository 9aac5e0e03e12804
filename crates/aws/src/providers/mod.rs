//! Collaborator implementations
//!
//! - [`MemoryStorage`]: in-memory [`Storage`](crate::traits::Storage) with failure injection
//! - `aws::AwsIdentityProvider`: IAM/STS over the AWS SDK (feature `aws-sdk`)

#[cfg(feature = "aws-sdk")]
pub mod aws;
mod memory;

#[cfg(feature = "aws-sdk")]
pub use aws::{AwsIdentityProvider, AwsProviderConfig};
pub use memory::MemoryStorage;
