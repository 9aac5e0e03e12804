//! Username generation
//!
//! Names for IAM users, federated users and assumed-role sessions are
//! rendered from a [`Template`] against three fields:
//!
//! | Field          | IAM user / assumed role       | Federation token |
//! |----------------|-------------------------------|------------------|
//! | `.Type`        | `IAM`                         | `STS`            |
//! | `.DisplayName` | sanitized display name        | empty            |
//! | `.PolicyName`  | sanitized role name           | empty            |
//!
//! The rendered name is checked against the provider's length limit for its
//! kind and rejected with [`CredentialError::UsernameTooLong`] rather than
//! truncated.

mod template;

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

pub use template::{Template, TemplateContext};

use crate::core::{CredentialError, Result};

/// Built-in template used when the root configuration has none
pub const DEFAULT_USERNAME_TEMPLATE: &str = concat!(
    r#"{{ if (eq .Type "STS") }}"#,
    r#"{{ printf "nebula-%s-%s" (unix_time) (random 20) | truncate 32 }}"#,
    r#"{{ else }}"#,
    r#"{{ printf "nebula-%s-%s-%s" (printf "%s-%s" (.DisplayName) (.PolicyName) | truncate 42) (unix_time) (random 20) | truncate 64 }}"#,
    r#"{{ end }}"#,
);

static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9+=,.@_-]").unwrap_or_else(|e| panic!("username charset pattern: {e}"))
});

/// What the generated name will be used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsernameKind {
    /// IAM user name
    IamUser,
    /// Role session name for `AssumeRole`
    AssumeRole,
    /// Federated user name for `GetFederationToken`
    FederationToken,
}

impl UsernameKind {
    /// Value of `.Type`
    pub fn type_label(self) -> &'static str {
        match self {
            Self::IamUser | Self::AssumeRole => "IAM",
            Self::FederationToken => "STS",
        }
    }

    /// Provider length limit in bytes
    pub fn max_len(self) -> usize {
        match self {
            Self::IamUser | Self::AssumeRole => 64,
            Self::FederationToken => 32,
        }
    }
}

/// Replace every character outside `[A-Za-z0-9+=,.@_-]` with `_`
pub fn sanitize(value: &str) -> String {
    DISALLOWED.replace_all(value, "_").into_owned()
}

/// Use a caller-supplied role session name as is, apart from sanitization
pub fn explicit_session_name(name: &str) -> String {
    sanitize(name)
}

/// Renders names from a parsed template
#[derive(Debug, Clone)]
pub struct UsernameGenerator {
    template: Template,
}

impl UsernameGenerator {
    /// Parse `template`, or the built-in default when `None`
    pub fn new(template: Option<&str>) -> Result<Self> {
        let template = Template::new(template.unwrap_or(DEFAULT_USERNAME_TEMPLATE))?;
        Ok(Self { template })
    }

    /// Template text in use
    pub fn template(&self) -> &str {
        self.template.source()
    }

    /// Render a name for `kind` and enforce its length limit
    pub fn generate(
        &self,
        kind: UsernameKind,
        display_name: &str,
        policy_name: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let (display_name, policy_name) = match kind {
            UsernameKind::FederationToken => (String::new(), String::new()),
            UsernameKind::IamUser | UsernameKind::AssumeRole => {
                (sanitize(display_name), sanitize(policy_name))
            }
        };
        let context = TemplateContext::new(now)
            .with_field("Type", kind.type_label())
            .with_field("DisplayName", display_name)
            .with_field("PolicyName", policy_name);

        let username = self.template.render(&context)?;
        if username.len() > kind.max_len() {
            return Err(CredentialError::UsernameTooLong {
                username_kind: kind.type_label(),
                length: username.len(),
                limit: kind.max_len(),
            });
        }
        Ok(username)
    }
}

/// Parse `template` and render one name
pub fn generate(
    kind: UsernameKind,
    display_name: &str,
    policy_name: &str,
    template: Option<&str>,
    now: DateTime<Utc>,
) -> Result<String> {
    UsernameGenerator::new(template)?.generate(kind, display_name, policy_name, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TemplateError;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[rstest]
    #[case("alice", "alice")]
    #[case("alice@example.com", "alice@example.com")]
    #[case("alice smith", "alice_smith")]
    #[case("a/b:c", "a_b_c")]
    #[case("ünï", "_n_")]
    #[case("+=,.@_-", "+=,.@_-")]
    fn test_sanitize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize(input), expected);
    }

    #[test]
    fn test_type_and_display_name() {
        let name = generate(
            UsernameKind::IamUser,
            "alice",
            "readonly",
            Some("{{.Type}}-{{.DisplayName}}"),
            now(),
        )
        .unwrap();
        assert_eq!(name, "IAM-alice");
    }

    #[test]
    fn test_display_name_is_sanitized_before_rendering() {
        let name = generate(
            UsernameKind::IamUser,
            "alice smith",
            "read only",
            Some("{{.DisplayName}}/{{.PolicyName}}"),
            now(),
        )
        .unwrap();
        assert_eq!(name, "alice_smith/read_only");
    }

    #[test]
    fn test_federation_token_fields() {
        let name = generate(
            UsernameKind::FederationToken,
            "alice",
            "readonly",
            Some("{{.Type}}[{{.DisplayName}}{{.PolicyName}}]"),
            now(),
        )
        .unwrap();
        assert_eq!(name, "STS[]");
    }

    #[test]
    fn test_default_template_iam_user() {
        let name = generate(UsernameKind::IamUser, "alice", "readonly", None, now()).unwrap();
        assert!(name.starts_with("nebula-alice-readonly-1700000000-"), "{name}");
        assert_eq!(name.len(), "nebula-alice-readonly-1700000000-".len() + 20);
    }

    #[test]
    fn test_default_template_long_names_fit() {
        let long = "x".repeat(200);
        let name = generate(UsernameKind::IamUser, &long, &long, None, now()).unwrap();
        assert_eq!(name.len(), 64);
    }

    #[test]
    fn test_default_template_federation_fits_32() {
        let name =
            generate(UsernameKind::FederationToken, "alice", "readonly", None, now()).unwrap();
        assert!(name.starts_with("nebula-1700000000-"), "{name}");
        assert_eq!(name.len(), 32);
    }

    #[test]
    fn test_too_long_is_rejected_not_truncated() {
        let err = generate(
            UsernameKind::FederationToken,
            "",
            "",
            Some(&"a".repeat(33)),
            now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CredentialError::UsernameTooLong {
                username_kind: "STS",
                length: 33,
                limit: 32
            }
        ));
    }

    #[test]
    fn test_invalid_template() {
        let err = UsernameGenerator::new(Some("{{ if .Type }}")).unwrap_err();
        assert!(matches!(
            err,
            CredentialError::TemplateInvalid {
                source: TemplateError::Parse { .. }
            }
        ));
    }

    #[test]
    fn test_explicit_session_name_only_sanitized() {
        assert_eq!(explicit_session_name("deploy job#7"), "deploy_job_7");
    }

    proptest! {
        #[test]
        fn prop_length_cap_is_enforced(display in "[a-z ]{0,80}", kind_idx in 0usize..3) {
            let kind = [UsernameKind::IamUser, UsernameKind::AssumeRole, UsernameKind::FederationToken][kind_idx];
            let result = generate(kind, &display, "role", Some("{{.Type}}-{{.DisplayName}}"), now());
            let expected_len = kind.type_label().len() + 1 + match kind {
                UsernameKind::FederationToken => 0,
                _ => display.len(),
            };
            if expected_len > kind.max_len() {
                let is_too_long = matches!(result, Err(CredentialError::UsernameTooLong { .. }));
                prop_assert!(is_too_long);
            } else {
                let name = result.unwrap();
                prop_assert_eq!(name.len(), expected_len);
                let again = generate(kind, &display, "role", Some("{{.Type}}-{{.DisplayName}}"), now()).unwrap();
                prop_assert_eq!(name, again);
            }
        }
    }
}
