//! Ledger coverage of IAM user issuance and the rollback sweep

use std::time::Duration;

use nebula_aws::core::{Operation, ProviderErrorKind};
use nebula_aws::strategy::IamUserRequest;
use nebula_aws::testing::{Harness, readonly_user};
use nebula_aws::traits::GroupPolicies;
use nebula_aws::{CredentialError, EngineConfig, StorageError};
use pretty_assertions::assert_eq;
use rstest::rstest;

const GRACE: Duration = Duration::from_secs(300);

fn alice() -> IamUserRequest {
    IamUserRequest {
        role: "readonly".into(),
        display_name: "alice".into(),
    }
}

async fn harness() -> Harness {
    let h = Harness::with_config(EngineConfig::default().with_rollback_min_age(GRACE));
    h.identity.add_group("devs", GroupPolicies::default());
    h.put_role(
        "readonly",
        &readonly_user()
            .with_policy_document(nebula_aws::testing::S3_READ_POLICY)
            .with_group("devs")
            .with_tag("owner", "nebula"),
    )
    .await;
    h.set_template("{{.Type}}-{{.DisplayName}}").await;
    h
}

#[tokio::test]
async fn test_ledger_write_failure_makes_no_calls() {
    let h = harness().await;
    h.storage.fail_puts("wal/");

    let err = h.broker.iam_user(alice()).await.unwrap_err();

    assert!(matches!(
        err,
        CredentialError::LedgerWrite {
            source: StorageError::Write { .. },
            ..
        }
    ));
    assert_eq!(h.identity.call_count(), 0);
}

#[tokio::test]
async fn test_create_failure_discards_ledger_entry() {
    let h = harness().await;
    h.identity
        .fail(Operation::CreateUser, ProviderErrorKind::AccessDenied);

    let err = h.broker.iam_user(alice()).await.unwrap_err();

    assert!(matches!(err, CredentialError::Provider(ref e) if e.kind == ProviderErrorKind::AccessDenied));
    assert!(h.wal_keys().is_empty());
    assert!(h.identity.usernames().is_empty());
}

#[tokio::test]
async fn test_create_failure_with_stuck_entry_reports_both() {
    let h = harness().await;
    h.identity
        .fail(Operation::CreateUser, ProviderErrorKind::Throttled);
    h.storage.fail_deletes("wal/");

    let err = h.broker.iam_user(alice()).await.unwrap_err();

    match err {
        CredentialError::LedgerDeleteAfterCreate {
            create_error,
            source,
            ..
        } => {
            assert_eq!(create_error.operation, Operation::CreateUser);
            assert!(matches!(source, StorageError::Delete { .. }));
        }
        other => panic!("expected LedgerDeleteAfterCreate, got {other:?}"),
    }
    assert_eq!(h.wal_keys().len(), 1);
}

#[rstest]
#[case::attach(Operation::AttachUserPolicy)]
#[case::inline(Operation::PutUserPolicy)]
#[case::group(Operation::AddUserToGroup)]
#[case::tag(Operation::TagUser)]
#[case::access_key(Operation::CreateAccessKey)]
#[tokio::test]
async fn test_partial_provisioning_is_swept(#[case] failing: Operation) {
    let h = harness().await;
    h.identity.fail_next(failing, ProviderErrorKind::Unavailable);

    let err = h.broker.iam_user(alice()).await.unwrap_err();
    assert!(matches!(err, CredentialError::Provider(ref e) if e.operation == failing));
    assert_eq!(h.identity.operations().last(), Some(&failing));
    assert!(h.identity.user("IAM-alice").is_some());
    assert_eq!(h.wal_keys().len(), 1);

    // inside the grace window the entry belongs to the issuance
    let early = h.broker.sweep().await.unwrap();
    assert_eq!(early.pending.len(), 1);
    assert!(early.rolled_back.is_empty());
    assert!(h.identity.user("IAM-alice").is_some());

    let report = h
        .broker_after(GRACE + Duration::from_secs(1))
        .sweep()
        .await
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.rolled_back, vec!["IAM-alice"]);
    assert!(h.identity.user("IAM-alice").is_none());
    assert!(h.wal_keys().is_empty());
}

#[tokio::test]
async fn test_commit_failure_leaves_provisioned_user() {
    let h = harness().await;
    h.storage.fail_deletes("wal/");

    let err = h.broker.iam_user(alice()).await.unwrap_err();

    assert!(matches!(err, CredentialError::LedgerDelete { .. }));
    let user = h.identity.user("IAM-alice").unwrap();
    assert_eq!(user.access_keys.len(), 1);
    assert_eq!(h.wal_keys().len(), 1);

    h.storage.clear_failures();
    let report = h
        .broker_after(GRACE * 2)
        .sweep()
        .await
        .unwrap();
    assert_eq!(report.rolled_back, vec!["IAM-alice"]);
    assert!(h.identity.usernames().is_empty());
}

#[tokio::test]
async fn test_sweep_keeps_entry_when_rollback_fails() {
    let h = harness().await;
    h.identity
        .fail_next(Operation::CreateAccessKey, ProviderErrorKind::Unavailable);
    h.broker.iam_user(alice()).await.unwrap_err();

    h.identity
        .fail(Operation::DeleteUser, ProviderErrorKind::Throttled);
    let later = h.broker_after(GRACE * 2);
    let report = later.sweep().await.unwrap();
    assert!(!report.is_clean());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(h.wal_keys().len(), 1);

    h.identity.clear_failures();
    let retry = later.sweep().await.unwrap();
    assert_eq!(retry.rolled_back, vec!["IAM-alice"]);
    assert!(h.wal_keys().is_empty());
}

#[tokio::test]
async fn test_sweep_tolerates_user_already_gone() {
    let h = harness().await;
    h.storage.fail_deletes("wal/");
    h.broker.iam_user(alice()).await.unwrap_err();
    h.storage.clear_failures();

    // revoked out of band before the sweep ran
    h.broker
        .leases()
        .revoke_internal_data(&serde_json::json!({"username": "IAM-alice"}))
        .await
        .unwrap();
    assert!(h.identity.user("IAM-alice").is_none());

    let report = h.broker_after(GRACE * 2).sweep().await.unwrap();
    assert_eq!(report.rolled_back, vec!["IAM-alice"]);
    assert!(h.wal_keys().is_empty());
}

#[tokio::test]
async fn test_sweep_list_failure() {
    let h = harness().await;
    h.storage.fail_lists("wal/");
    assert!(matches!(
        h.broker.sweep().await,
        Err(CredentialError::LedgerList { .. })
    ));
}
