//! Configuration records

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration stored at `config/root`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    /// Username template; empty or absent selects the built-in default
    pub username_template: Option<String>,

    /// Region hint for the SDK identity provider
    pub region: Option<String>,
}

impl RootConfig {
    /// Configured template, ignoring an empty string
    pub fn username_template(&self) -> Option<&str> {
        self.username_template
            .as_deref()
            .filter(|template| !template.trim().is_empty())
    }
}

/// Lease defaults for IAM user credentials, stored at `config/lease`
///
/// A missing record behaves as the zero lease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Initial and renewal TTL
    #[serde(with = "humantime_serde")]
    pub lease: Duration,

    /// Maximum lifetime
    #[serde(with = "humantime_serde")]
    pub lease_max: Duration,
}

impl LeaseConfig {
    /// Create a lease configuration
    pub fn new(lease: Duration, lease_max: Duration) -> Self {
        Self { lease, lease_max }
    }
}

/// In-process engine settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// WAL entries younger than this are left to the issuance that wrote them
    pub rollback_min_age: Duration,

    /// STS lifetime when neither the request nor the role specify one
    pub default_sts_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rollback_min_age: Duration::from_secs(5 * 60),
            default_sts_ttl: Duration::from_secs(3600),
        }
    }
}

impl EngineConfig {
    /// Set the rollback grace window
    pub fn with_rollback_min_age(mut self, age: Duration) -> Self {
        self.rollback_min_age = age;
        self
    }

    /// Set the fallback STS lifetime
    pub fn with_default_sts_ttl(mut self, ttl: Duration) -> Self {
        self.default_sts_ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_config_humantime() {
        let lease: LeaseConfig =
            serde_json::from_str(r#"{"lease":"1h","lease_max":"24h"}"#).unwrap();
        assert_eq!(lease.lease, Duration::from_secs(3600));
        assert_eq!(lease.lease_max, Duration::from_secs(86_400));

        let json = serde_json::to_string(&lease).unwrap();
        let back: LeaseConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, lease);
    }

    #[test]
    fn test_empty_template_is_unset() {
        let config = RootConfig {
            username_template: Some("  ".into()),
            region: None,
        };
        assert_eq!(config.username_template(), None);
    }

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.rollback_min_age, Duration::from_secs(300));
        assert_eq!(config.default_sts_ttl, Duration::from_secs(3600));
    }
}
