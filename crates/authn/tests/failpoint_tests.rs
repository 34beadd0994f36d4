#![allow(clippy::expect_used, clippy::panic)]
//! Integration tests for fail-point injection in the authn crate.
//!
//! These tests require the `failpoints` feature:
//! ```bash
//! cargo test -p keyward-authn --features failpoints --test failpoint_tests
//! ```

use keyward_authn::{
    AuthError, BootstrapRole,
    bootstrap::{ABORT_FLAG_KEY, ANNOUNCE_KEY, MASTER_FLAG_KEY},
    rotation::{ROTATION_COOLDOWN_KEY, ROTATION_LOCK_KEY},
    testutil::TestHarness,
};
use keyward_storage::{CoordinationStore, auth::SigningKeyRecordStore};

#[tokio::test]
async fn bootstrap_publish_failpoint_aborts_fleet() {
    let scenario = fail::FailScenario::setup();
    let harness = TestHarness::new();

    fail::cfg("bootstrap-before-publish", "return").expect("failed to configure fail point");

    let master = harness.bootstrap(&["123"]);
    let follower = harness.bootstrap(&["999"]);
    let (first, second) = tokio::join!(master.run(), follower.run());

    assert!(matches!(first, Err(AuthError::KeyMaterial { .. })), "master should fail");
    assert!(matches!(second, Err(AuthError::BootstrapAborted)), "follower should abort");
    assert!(harness.coordination.exists(ABORT_FLAG_KEY).await.expect("exists"));
    assert!(!harness.coordination.exists(MASTER_FLAG_KEY).await.expect("exists"));
    assert!(harness.coordination.get(ANNOUNCE_KEY).await.expect("get").is_none());

    scenario.teardown();
}

#[tokio::test]
async fn bootstrap_discovery_failpoint_leaves_store_untouched() {
    let scenario = fail::FailScenario::setup();
    let harness = TestHarness::new();

    fail::cfg("bootstrap-before-discovery", "return").expect("failed to configure fail point");

    let result = harness.bootstrap(&["123"]).run().await;
    assert!(result.is_err(), "bootstrap should fail when fail point is active");
    assert!(harness.records.is_empty());
    assert!(!harness.files().public_path("123").exists());

    scenario.teardown();
}

#[tokio::test]
async fn bootstrap_retry_after_failure_succeeds() {
    let scenario = fail::FailScenario::setup();
    let harness = TestHarness::new();

    fail::cfg("bootstrap-before-publish", "return").expect("failed to configure fail point");
    assert!(harness.bootstrap(&["123"]).run().await.is_err());
    fail::remove("bootstrap-before-publish");

    // The failed attempt persisted its key; the retry adopts it and clears
    // the abort flag.
    let outcome = harness.bootstrap(&["999"]).run().await.expect("retry");
    assert_eq!(outcome.role, BootstrapRole::Master);
    assert_eq!(outcome.keys.latest_kid().as_deref(), Some("123"));
    assert!(!harness.coordination.exists(ABORT_FLAG_KEY).await.expect("exists"));

    scenario.teardown();
}

#[tokio::test]
async fn bootstrap_without_failpoint_succeeds() {
    let scenario = fail::FailScenario::setup();
    let harness = TestHarness::new();

    // No fail point configured, so bootstrap should succeed
    let result = harness.bootstrap(&["123"]).run().await;
    assert!(result.is_ok(), "bootstrap should succeed without fail point");

    scenario.teardown();
}

#[tokio::test]
async fn rotation_publish_failpoint_rolls_back() {
    let scenario = fail::FailScenario::setup();
    let harness = TestHarness::new();
    let (_, manager) = harness.start(&["123"]).await.expect("bootstrap");
    let rotator = harness.rotator(&manager, &["456", "789"]);

    fail::cfg("rotation-before-publish", "return").expect("failed to configure fail point");
    let result = rotator.rotate("ops").await;
    fail::remove("rotation-before-publish");

    assert!(matches!(result, Err(AuthError::KeyMaterial { .. })));
    let old = harness.records.get_key("123").await.expect("get").expect("old record");
    assert!(old.is_active());
    assert!(harness.records.get_key("456").await.expect("get").is_none());
    assert_eq!(manager.keys().latest_kid().as_deref(), Some("123"));
    assert!(!manager.keys().contains("456"));
    assert_eq!(harness.coordination.get(ANNOUNCE_KEY).await.expect("get").as_deref(), Some("123"));
    assert!(!harness.coordination.exists(ROTATION_COOLDOWN_KEY).await.expect("exists"));
    assert!(!harness.coordination.exists(ROTATION_LOCK_KEY).await.expect("exists"));

    let outcome = rotator.rotate("ops").await.expect("retry");
    assert_eq!(outcome.previous_kid, "123");
    assert_eq!(outcome.new_kid, "789");

    scenario.teardown();
}
