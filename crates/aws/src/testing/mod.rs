//! Testing utilities
//!
//! A recording fake of the IAM/STS provider and a harness wiring it to
//! in-memory storage and a frozen clock, so broker behavior can be checked
//! without AWS.

mod fixtures;
mod identity;

pub use fixtures::*;
pub use identity::{Call, FakeIdentityProvider, FakeUser};
