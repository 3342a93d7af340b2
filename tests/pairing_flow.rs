mod helpers;

use helpers::db::lapse_registration;
use helpers::{context, paired_device, OrganizationBuilder, TestDb};
use tether::errors::TetherError;
use tether::pairing::{self, DeviceDescriptor, RegistrationStatus};
use tether::settings::Settings;
use tether::tenant::Role;

#[tokio::test]
async fn test_issue_submit_approve_then_second_approve_conflicts() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme")
        .with_member("alice", Role::Operator)
        .create(db)
        .await;
    let ctx = context(db, "acme", "alice").await;

    let issued = pairing::issue_code(
        db,
        &ctx,
        &settings.pairing,
        Some("Front desk tablet".to_string()),
        Some(3600),
    )
    .await
    .expect("issue code");
    assert_eq!(issued.pairing_code.len(), 6);

    // Human-typed: lowercase with a separator still matches
    let typed = format!(
        "{}-{}",
        &issued.pairing_code[..3].to_lowercase(),
        &issued.pairing_code[3..].to_lowercase()
    );
    let mut descriptor = DeviceDescriptor::new("Pixel 7");
    descriptor.os_version = Some("14".to_string());
    descriptor.push_token = Some("fcm-token-1".to_string());
    let submission = pairing::submit_registration(db, &typed, descriptor)
        .await
        .expect("submit registration");
    assert_eq!(submission.registration_id, issued.registration_id);
    assert_eq!(submission.organization_id, "acme");

    let device = pairing::approve(db, &ctx, &settings.presence, &issued.registration_id)
        .await
        .expect("approve");
    assert_eq!(device.organization_id, "acme");
    assert_eq!(device.display_name, "Front desk tablet");
    assert_eq!(device.model.as_deref(), Some("Pixel 7"));
    assert_eq!(device.push_address.as_deref(), Some("fcm-token-1"));

    let registration = pairing::get_registration(db, &ctx, &issued.registration_id)
        .await
        .expect("get registration");
    assert_eq!(registration.status, RegistrationStatus::Approved);
    assert_eq!(registration.approved_by.as_deref(), Some("alice"));
    assert_eq!(registration.device_id.as_deref(), Some(device.id.as_str()));

    let second = pairing::approve(db, &ctx, &settings.presence, &issued.registration_id).await;
    assert!(matches!(second, Err(TetherError::Conflict(_))), "got {second:?}");

    // The device side can now learn its id
    let state = pairing::pairing_state(db, &issued.registration_id)
        .await
        .expect("pairing state");
    assert_eq!(state.status, RegistrationStatus::Approved);
    assert_eq!(state.device_id.as_deref(), Some(device.id.as_str()));
}

#[tokio::test]
async fn test_submit_after_expiry_fails_without_sweep() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    let ctx = context(db, "acme", "acme-owner").await;

    let issued = pairing::issue_code(db, &ctx, &settings.pairing, None, Some(60))
        .await
        .expect("issue code");
    lapse_registration(db, &issued.registration_id).await;

    let result =
        pairing::submit_registration(db, &issued.pairing_code, DeviceDescriptor::new("Pixel 7"))
            .await;
    assert!(matches!(result, Err(TetherError::Expired(_))), "got {result:?}");

    // Reads present it as expired although the stored status is still pending
    let registration = pairing::get_registration(db, &ctx, &issued.registration_id)
        .await
        .expect("get registration");
    assert_eq!(registration.status, RegistrationStatus::Expired);

    let expired = pairing::list_registrations(db, &ctx, Some(RegistrationStatus::Expired))
        .await
        .expect("list expired");
    assert_eq!(expired.len(), 1);
    let pending = pairing::list_registrations(db, &ctx, Some(RegistrationStatus::Pending))
        .await
        .expect("list pending");
    assert!(pending.is_empty());

    // Persisting expiry changes nothing observable
    assert_eq!(pairing::expire_stale_registrations(db).await.unwrap(), 1);
    let result =
        pairing::submit_registration(db, &issued.pairing_code, DeviceDescriptor::new("Pixel 7"))
            .await;
    assert!(matches!(result, Err(TetherError::Expired(_))), "got {result:?}");
}

#[tokio::test]
async fn test_approve_and_reject_refuse_expired_registration() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    let ctx = context(db, "acme", "acme-owner").await;

    let issued = pairing::issue_code(db, &ctx, &settings.pairing, None, None)
        .await
        .expect("issue code");
    pairing::submit_registration(db, &issued.pairing_code, DeviceDescriptor::new("Pixel 7"))
        .await
        .expect("submit");
    lapse_registration(db, &issued.registration_id).await;

    let approve = pairing::approve(db, &ctx, &settings.presence, &issued.registration_id).await;
    assert!(matches!(approve, Err(TetherError::Expired(_))), "got {approve:?}");

    let reject = pairing::reject(db, &ctx, &issued.registration_id, None).await;
    assert!(matches!(reject, Err(TetherError::Expired(_))), "got {reject:?}");
}

#[tokio::test]
async fn test_unknown_code_and_double_submission() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    let ctx = context(db, "acme", "acme-owner").await;

    let unknown = pairing::submit_registration(db, "ZZZZZZ", DeviceDescriptor::new("Pixel 7")).await;
    assert!(matches!(unknown, Err(TetherError::NotFound(_))), "got {unknown:?}");

    let issued = pairing::issue_code(db, &ctx, &settings.pairing, None, None)
        .await
        .expect("issue code");
    pairing::submit_registration(db, &issued.pairing_code, DeviceDescriptor::new("Pixel 7"))
        .await
        .expect("first submission");

    let again =
        pairing::submit_registration(db, &issued.pairing_code, DeviceDescriptor::new("Galaxy S23"))
            .await;
    assert!(matches!(again, Err(TetherError::Conflict(_))), "got {again:?}");

    let registration = pairing::get_registration(db, &ctx, &issued.registration_id)
        .await
        .unwrap();
    assert_eq!(registration.descriptor.unwrap().model, "Pixel 7");
}

#[tokio::test]
async fn test_rejected_registration_never_changes() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    let ctx = context(db, "acme", "acme-owner").await;

    let issued = pairing::issue_code(db, &ctx, &settings.pairing, None, None)
        .await
        .expect("issue code");
    pairing::submit_registration(db, &issued.pairing_code, DeviceDescriptor::new("Pixel 7"))
        .await
        .expect("submit");

    let rejected = pairing::reject(
        db,
        &ctx,
        &issued.registration_id,
        Some("unknown hardware".to_string()),
    )
    .await
    .expect("reject");
    assert_eq!(rejected.status, RegistrationStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("unknown hardware"));

    let approve = pairing::approve(db, &ctx, &settings.presence, &issued.registration_id).await;
    assert!(matches!(approve, Err(TetherError::Conflict(_))), "got {approve:?}");
    let reject_again = pairing::reject(db, &ctx, &issued.registration_id, None).await;
    assert!(matches!(reject_again, Err(TetherError::Conflict(_))), "got {reject_again:?}");

    let registration = pairing::get_registration(db, &ctx, &issued.registration_id)
        .await
        .unwrap();
    assert_eq!(registration.status, RegistrationStatus::Rejected);
    assert!(registration.device_id.is_none());
    assert_eq!(registration.rejection_reason.as_deref(), Some("unknown hardware"));
}

#[tokio::test]
async fn test_approve_before_submission_conflicts() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    let ctx = context(db, "acme", "acme-owner").await;

    let issued = pairing::issue_code(db, &ctx, &settings.pairing, None, None)
        .await
        .expect("issue code");
    let result = pairing::approve(db, &ctx, &settings.presence, &issued.registration_id).await;
    assert!(matches!(result, Err(TetherError::Conflict(_))), "got {result:?}");
}

#[tokio::test]
async fn test_other_organization_sees_not_found() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    OrganizationBuilder::new("globex").create(db).await;
    let acme = context(db, "acme", "acme-owner").await;
    let globex = context(db, "globex", "globex-owner").await;

    let issued = pairing::issue_code(db, &acme, &settings.pairing, None, None)
        .await
        .expect("issue code");
    pairing::submit_registration(db, &issued.pairing_code, DeviceDescriptor::new("Pixel 7"))
        .await
        .expect("submit");

    let approve = pairing::approve(db, &globex, &settings.presence, &issued.registration_id).await;
    assert!(matches!(approve, Err(TetherError::NotFound(_))), "got {approve:?}");
    let get = pairing::get_registration(db, &globex, &issued.registration_id).await;
    assert!(matches!(get, Err(TetherError::NotFound(_))), "got {get:?}");
    assert!(pairing::list_registrations(db, &globex, None)
        .await
        .unwrap()
        .is_empty());

    // Still approvable by its owner
    pairing::approve(db, &acme, &settings.presence, &issued.registration_id)
        .await
        .expect("owner approves");
}

#[tokio::test]
async fn test_device_quota() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme")
        .with_max_devices(1)
        .create(db)
        .await;
    let ctx = context(db, "acme", "acme-owner").await;

    // Two slots issued while there is still room
    let first = pairing::issue_code(db, &ctx, &settings.pairing, None, None)
        .await
        .expect("first code");
    let second = pairing::issue_code(db, &ctx, &settings.pairing, None, None)
        .await
        .expect("second code");
    for code in [&first.pairing_code, &second.pairing_code] {
        pairing::submit_registration(db, code, DeviceDescriptor::new("Pixel 7"))
            .await
            .expect("submit");
    }

    pairing::approve(db, &ctx, &settings.presence, &first.registration_id)
        .await
        .expect("first approval fits");

    let over = pairing::approve(db, &ctx, &settings.presence, &second.registration_id).await;
    assert!(matches!(over, Err(TetherError::LimitExceeded(_))), "got {over:?}");

    // Rolled back: still pending, no device attached
    let registration = pairing::get_registration(db, &ctx, &second.registration_id)
        .await
        .unwrap();
    assert_eq!(registration.status, RegistrationStatus::Pending);
    assert!(registration.device_id.is_none());

    let issue = pairing::issue_code(db, &ctx, &settings.pairing, None, None).await;
    assert!(matches!(issue, Err(TetherError::LimitExceeded(_))), "got {issue:?}");
}

#[tokio::test]
async fn test_concurrent_approvals_provision_one_device() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme")
        .with_member("bob", Role::Admin)
        .create(db)
        .await;
    let owner = context(db, "acme", "acme-owner").await;
    let bob = context(db, "acme", "bob").await;

    let issued = pairing::issue_code(db, &owner, &settings.pairing, None, None)
        .await
        .expect("issue code");
    pairing::submit_registration(db, &issued.pairing_code, DeviceDescriptor::new("Pixel 7"))
        .await
        .expect("submit");

    // The test pool has a single connection, so the two transactions queue rather
    // than interleave; this pins the guarded update's outcome, not the race itself
    let (a, b) = tokio::join!(
        pairing::approve(db, &owner, &settings.presence, &issued.registration_id),
        pairing::approve(db, &bob, &settings.presence, &issued.registration_id),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "a = {a:?}, b = {b:?}");
    let loser = if a.is_ok() { &b } else { &a };
    assert!(matches!(loser, Err(TetherError::Conflict(_))), "got {loser:?}");

    let devices = tether::devices::list_devices(db, &owner, &settings.presence)
        .await
        .unwrap();
    assert_eq!(devices.len(), 1);
}

#[tokio::test]
async fn test_viewer_cannot_issue_codes() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme")
        .with_member("victor", Role::Viewer)
        .create(db)
        .await;
    let viewer = context(db, "acme", "victor").await;

    let result = pairing::issue_code(db, &viewer, &settings.pairing, None, None).await;
    assert!(matches!(result, Err(TetherError::Forbidden(_))), "got {result:?}");
}

#[tokio::test]
async fn test_validity_bounds() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    let ctx = context(db, "acme", "acme-owner").await;

    for validity in [0, -5, settings.pairing.max_validity_secs + 1] {
        let result =
            pairing::issue_code(db, &ctx, &settings.pairing, None, Some(validity)).await;
        assert!(matches!(result, Err(TetherError::BadRequest(_))), "validity {validity}");
    }
}

#[tokio::test]
async fn test_retired_devices_free_quota() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme")
        .with_max_devices(1)
        .create(db)
        .await;
    let ctx = context(db, "acme", "acme-owner").await;

    let device = paired_device(db, &ctx, None).await;
    assert!(pairing::issue_code(db, &ctx, &settings.pairing, None, None)
        .await
        .is_err());

    tether::devices::retire_device(db, &ctx, &device.id)
        .await
        .expect("retire");
    pairing::issue_code(db, &ctx, &settings.pairing, None, None)
        .await
        .expect("room again after retirement");
}

#[tokio::test]
async fn test_concurrent_approvals_respect_device_quota() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme")
        .with_max_devices(1)
        .with_member("bob", Role::Admin)
        .create(db)
        .await;
    let owner = context(db, "acme", "acme-owner").await;
    let bob = context(db, "acme", "bob").await;

    let first = pairing::issue_code(db, &owner, &settings.pairing, None, None)
        .await
        .unwrap();
    let second = pairing::issue_code(db, &owner, &settings.pairing, None, None)
        .await
        .unwrap();
    for code in [&first.pairing_code, &second.pairing_code] {
        pairing::submit_registration(db, code, DeviceDescriptor::new("Pixel 7"))
            .await
            .unwrap();
    }

    let (a, b) = tokio::join!(
        pairing::approve(db, &owner, &settings.presence, &first.registration_id),
        pairing::approve(db, &bob, &settings.presence, &second.registration_id),
    );
    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "a = {a:?}, b = {b:?}");
    let loser = if a.is_ok() { &b } else { &a };
    assert!(matches!(loser, Err(TetherError::LimitExceeded(_))), "got {loser:?}");

    let devices = tether::devices::list_devices(db, &owner, &settings.presence)
        .await
        .unwrap();
    assert_eq!(devices.len(), 1);
}

#[tokio::test]
async fn test_expired_and_settled_codes_can_be_reissued() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    let ctx = context(db, "acme", "acme-owner").await;

    let lapsed = pairing::issue_preset_code(db, &ctx, &settings.pairing, "7F3K2Q", None, Some(3600))
        .await
        .expect("first issue");
    assert_eq!(lapsed.pairing_code, "7F3K2Q");

    // Live codes are never handed out twice
    let taken = pairing::issue_preset_code(db, &ctx, &settings.pairing, "7f3-k2q", None, None).await;
    assert!(matches!(taken, Err(TetherError::Conflict(_))), "got {taken:?}");

    // Lapsed but not yet swept: the code is free again
    lapse_registration(db, &lapsed.registration_id).await;
    let live = pairing::issue_preset_code(db, &ctx, &settings.pairing, "7F3K2Q", None, Some(3600))
        .await
        .expect("reissue over lapsed registration");
    assert_ne!(live.registration_id, lapsed.registration_id);

    let old = pairing::get_registration(db, &ctx, &lapsed.registration_id)
        .await
        .unwrap();
    assert_eq!(old.status, RegistrationStatus::Expired);

    // Redemption binds the live registration, never the lapsed one
    let submission = pairing::submit_registration(db, "7f3k2q", DeviceDescriptor::new("Pixel 7"))
        .await
        .expect("submit");
    assert_eq!(submission.registration_id, live.registration_id);

    // Settled registrations release their code too
    pairing::reject(db, &ctx, &live.registration_id, Some("wrong unit".to_string()))
        .await
        .unwrap();
    let third = pairing::issue_preset_code(db, &ctx, &settings.pairing, "7F3K2Q", None, None)
        .await
        .expect("reissue over rejected registration");
    let submission = pairing::submit_registration(db, "7F3K2Q", DeviceDescriptor::new("Pixel 8"))
        .await
        .unwrap();
    assert_eq!(submission.registration_id, third.registration_id);
}

#[tokio::test]
async fn test_live_code_is_unique_across_organizations() {
    use sea_orm::{ActiveModelTrait, Set, SqlErr};

    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    OrganizationBuilder::new("globex").create(db).await;
    let acme = context(db, "acme", "acme-owner").await;
    let globex = context(db, "globex", "globex-owner").await;

    pairing::issue_preset_code(db, &acme, &settings.pairing, "7F3K2Q", None, None)
        .await
        .unwrap();
    let other = pairing::issue_preset_code(db, &globex, &settings.pairing, "7F3K2Q", None, None).await;
    assert!(matches!(other, Err(TetherError::Conflict(_))), "got {other:?}");

    // A writer that skipped the collision check still cannot commit a duplicate
    let now = tether::storage::now();
    let duplicate = tether::entities::device_registration::ActiveModel {
        id: Set(tether::storage::random_id()),
        organization_id: Set("globex".to_string()),
        pairing_code: Set("7F3K2Q".to_string()),
        description: Set(None),
        descriptor: Set(None),
        status: Set("pending".to_string()),
        issued_by: Set("globex-owner".to_string()),
        created_at: Set(now),
        expires_at: Set(now + 600),
        submitted_at: Set(None),
        approved_by: Set(None),
        approved_at: Set(None),
        rejected_by: Set(None),
        rejected_at: Set(None),
        rejection_reason: Set(None),
        device_id: Set(None),
        live_code: Set(Some("7F3K2Q".to_string())),
    }
    .insert(db)
    .await
    .expect_err("duplicate live code");
    assert!(
        matches!(duplicate.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))),
        "got {duplicate:?}"
    );
}

#[tokio::test]
async fn test_preset_code_must_fit_alphabet() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let settings = Settings::default();

    OrganizationBuilder::new("acme").create(db).await;
    let ctx = context(db, "acme", "acme-owner").await;

    for code in ["7F3K2O", "7F3K2", "7F3K2QQ", ""] {
        let result = pairing::issue_preset_code(db, &ctx, &settings.pairing, code, None, None).await;
        assert!(matches!(result, Err(TetherError::BadRequest(_))), "{code}: {result:?}");
    }
}
