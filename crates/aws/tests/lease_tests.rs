//! Renewal and revocation through the broker

use std::time::Duration;

use nebula_aws::core::Operation;
use nebula_aws::lease::RevokeOutcome;
use nebula_aws::strategy::{FederationTokenRequest, IamUserRequest};
use nebula_aws::testing::{Harness, federation, readonly_user};
use nebula_aws::{CredentialError, LeaseState, SecretMetadata};
use pretty_assertions::assert_eq;
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

#[tokio::test]
async fn test_iam_user_lease_lifecycle() {
    init_tracing();
    let h = Harness::new();
    h.put_role("readonly", &readonly_user()).await;
    h.set_lease(Duration::from_secs(600), Duration::from_secs(3600))
        .await;

    let mut secret = h
        .broker
        .iam_user(IamUserRequest {
            role: "readonly".into(),
            display_name: "dave".into(),
        })
        .await
        .unwrap();
    let username = secret.metadata.username.clone().unwrap();

    // lease changes apply on renewal
    h.set_lease(Duration::from_secs(1200), Duration::from_secs(7200))
        .await;
    let renewed = h.broker.renew(&secret).await.unwrap().unwrap();
    assert_eq!(renewed.ttl, Duration::from_secs(1200));
    assert_eq!(renewed.max_ttl, Duration::from_secs(7200));
    assert_eq!(renewed.state, LeaseState::Renewed);

    h.identity.reset_calls();
    let outcome = h.broker.revoke(&mut secret).await.unwrap();
    assert_eq!(
        outcome,
        RevokeOutcome::Revoked {
            username: username.clone()
        }
    );
    assert_eq!(secret.state, LeaseState::Revoked);
    assert!(h.identity.user(&username).is_none());
    assert_eq!(h.identity.operations().last(), Some(&Operation::DeleteUser));
}

#[tokio::test]
async fn test_sts_lease_makes_no_calls() {
    let h = Harness::new();
    h.put_role("s3", &federation()).await;
    let mut secret = h
        .broker
        .federation_token(FederationTokenRequest {
            role: "s3".into(),
            ttl: None,
        })
        .await
        .unwrap();
    h.identity.reset_calls();

    assert!(h.broker.renew(&secret).await.unwrap().is_none());
    assert_eq!(
        h.broker.revoke(&mut secret).await.unwrap(),
        RevokeOutcome::Skipped
    );
    assert_eq!(secret.state, LeaseState::Revoked);
    assert_eq!(h.identity.call_count(), 0);
}

#[tokio::test]
async fn test_stored_internal_data_round_trips() {
    let h = Harness::new();
    h.put_role("readonly", &readonly_user()).await;
    let secret = h.broker.creds("readonly", "erin").await.unwrap();

    let stored = secret.internal_data();
    let decoded = SecretMetadata::from_internal_data(&stored).unwrap();
    assert_eq!(decoded, secret.metadata);

    let outcome = h.broker.leases().revoke_internal_data(&stored).await.unwrap();
    assert!(matches!(outcome, RevokeOutcome::Revoked { .. }));
    assert!(h.identity.usernames().is_empty());
}

#[tokio::test]
async fn test_revoke_without_username_is_rejected() {
    let h = Harness::new();
    for record in [
        json!({"is_sts": false}),
        json!({"version": 1, "is_sts": false, "username": ""}),
    ] {
        let err = h
            .broker
            .leases()
            .revoke_internal_data(&record)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::MalformedSecretMetadata { .. }));
    }
    assert_eq!(h.identity.call_count(), 0);
}

#[tokio::test]
async fn test_revoke_of_missing_user_succeeds() {
    let h = Harness::new();
    let outcome = h
        .broker
        .leases()
        .revoke_internal_data(&json!({"is_sts": false, "username": "long-gone"}))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RevokeOutcome::Revoked {
            username: "long-gone".into()
        }
    );
    assert_eq!(h.identity.operations(), vec![Operation::ListGroupsForUser]);
}
