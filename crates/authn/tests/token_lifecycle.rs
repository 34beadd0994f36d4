//! Token lifecycle tests.
//!
//! These tests drive a bootstrapped [`TokenManager`] through login, request
//! verification, refresh, replay and logout, and check the family ledger
//! after each step.
#![allow(clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use keyward_authn::{
    AuthError, DecodeOptions, FamilyEntry, FamilyId, Issuance, TokenManager, TokenType,
    jwt::{decode_token_header, decode_unverified_claims},
    testutil::{TestHarness, sign_claims, unix_now},
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn started() -> (TestHarness, Arc<TokenManager>) {
    let harness = TestHarness::new();
    let (_, manager) = harness.start(&["123"]).await.expect("bootstrap");
    (harness, manager)
}

async fn login(manager: &TokenManager, subject: &str, session: i64) -> (FamilyId, String, String) {
    let fid = FamilyId::derive(subject, session);
    let refresh = manager
        .issue_refresh_token(subject, session, &fid, Issuance::First)
        .await
        .expect("first refresh token");
    let access = manager.issue_access_token(subject, session, &fid).expect("access token");
    (fid, refresh, access)
}

// ===========================================================================
// Round trip and idempotence
// ===========================================================================

#[tokio::test]
async fn test_refresh_token_round_trip_recovers_claims() {
    let (_harness, manager) = started().await;
    let (fid, refresh, _) = login(&manager, "alice", 42).await;

    let unverified = decode_unverified_claims(&refresh).expect("payload");
    let claims = manager
        .decode_token(&refresh, TokenType::Refresh, DecodeOptions::default())
        .await
        .expect("refresh token verifies");

    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.sid, 42);
    assert_eq!(claims.fid, fid.as_str());
    assert_eq!(claims.jti, unverified.jti);
    assert_eq!(claims.exp, unverified.exp);
    assert_eq!(decode_token_header(&refresh).expect("header").typ.as_deref(), Some("JWT+refresh"));
}

#[tokio::test]
async fn test_decode_is_idempotent() {
    let (_harness, manager) = started().await;
    let (_, refresh, access) = login(&manager, "alice", 42).await;

    for (token, token_type) in [(&access, TokenType::Access), (&refresh, TokenType::Refresh)] {
        let first = manager
            .decode_token(token, token_type, DecodeOptions::default())
            .await
            .expect("first decode");
        let second = manager
            .decode_token(token, token_type, DecodeOptions::default())
            .await
            .expect("second decode");
        assert_eq!(first, second);
    }
}

#[tokio::test]
async fn test_concurrent_verification() {
    let (_harness, manager) = started().await;
    let (_, _, access) = login(&manager, "alice", 42).await;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        let token = access.clone();
        handles.push(tokio::spawn(async move {
            manager.decode_token(&token, TokenType::Access, DecodeOptions::default()).await
        }));
    }

    for handle in handles {
        let claims = handle.await.expect("task").expect("verifies");
        assert_eq!(claims.sub, "alice");
    }
}

// ===========================================================================
// Family creation
// ===========================================================================

#[tokio::test]
async fn test_second_first_issuance_fails_and_invalidates_family() {
    let (_harness, manager) = started().await;
    let (fid, refresh, _) = login(&manager, "alice", 42).await;

    let result = manager.issue_refresh_token("alice", 42, &fid, Issuance::First).await;
    assert!(matches!(result, Err(AuthError::FamilyExists { fid: ref f }) if f == fid.as_str()));

    assert!(!manager.ledger().is_active(&fid).await.expect("ledger"));
    let result = manager.reissue_token_pair(&refresh).await;
    assert!(matches!(result, Err(AuthError::TokenIntegrity { .. })));
}

#[tokio::test]
async fn test_families_are_independent() {
    let (_harness, manager) = started().await;
    let (alice, _, _) = login(&manager, "alice", 42).await;
    let (bob, bob_refresh, _) = login(&manager, "bob", 42).await;

    manager.invalidate_family(&alice).await.expect("invalidate");

    assert!(!manager.ledger().is_active(&alice).await.expect("ledger"));
    assert!(manager.ledger().is_active(&bob).await.expect("ledger"));
    manager.reissue_token_pair(&bob_refresh).await.expect("bob unaffected");
}

// ===========================================================================
// Reissuance
// ===========================================================================

#[tokio::test]
async fn test_reissue_returns_pair_in_same_family() {
    let (_harness, manager) = started().await;
    let (fid, refresh, _) = login(&manager, "alice", 42).await;

    let pair = manager.reissue_token_pair(&refresh).await.expect("reissue");

    let access = manager
        .decode_token(&pair.access_token, TokenType::Access, DecodeOptions::default())
        .await
        .expect("new access token");
    let next = manager
        .decode_token(&pair.refresh_token, TokenType::Refresh, DecodeOptions::default())
        .await
        .expect("new refresh token");

    assert_eq!(access.fid, fid.as_str());
    assert_eq!(next.fid, fid.as_str());
    assert_eq!(next.sub, "alice");
    assert_eq!(next.sid, 42);
    assert_eq!(
        manager.ledger().head(&fid).await.expect("ledger"),
        Some(FamilyEntry::new(next.jti, next.exp))
    );
}

#[tokio::test]
async fn test_window_shift_evicts_oldest_first() {
    let (_harness, manager) = started().await;
    let (fid, mut refresh, _) = login(&manager, "alice", 42).await;
    let window = manager.config().max_tokens_per_family();

    let mut issued = vec![decode_unverified_claims(&refresh).expect("claims").jti];
    for _ in 0..=window {
        refresh = manager.reissue_token_pair(&refresh).await.expect("reissue").refresh_token;
        issued.push(decode_unverified_claims(&refresh).expect("claims").jti);
    }

    let entries = manager.ledger().entries(&fid).await.expect("ledger");
    let jtis: Vec<_> = entries.into_iter().map(|e| e.jti).collect();
    let expected: Vec<_> = issued.iter().rev().take(window).cloned().collect();
    assert_eq!(jtis.len(), window);
    assert_eq!(jtis, expected);
}

#[tokio::test]
async fn test_replay_invalidates_family() {
    let (_harness, manager) = started().await;
    let (fid, first, _) = login(&manager, "alice", 42).await;

    let pair = manager.reissue_token_pair(&first).await.expect("legitimate reissue");

    // `first` is no longer the head.
    let replay = manager.reissue_token_pair(&first).await;
    assert!(matches!(replay, Err(AuthError::TokenIntegrity { fid: ref f, .. }) if f == fid.as_str()));
    assert!(!manager.ledger().is_active(&fid).await.expect("ledger"));

    // The once-valid head is revoked with the family.
    let result = manager.reissue_token_pair(&pair.refresh_token).await;
    assert!(matches!(result, Err(AuthError::TokenIntegrity { .. })));
}

#[tokio::test]
async fn test_reissue_with_mismatched_prior_exp_is_replay() {
    let (_harness, manager) = started().await;
    let (fid, refresh, _) = login(&manager, "alice", 42).await;
    let claims = decode_unverified_claims(&refresh).expect("claims");

    let result = manager
        .issue_refresh_token(
            "alice",
            42,
            &fid,
            Issuance::Reissue { prior_jti: claims.jti, prior_exp: claims.exp + 1 },
        )
        .await;

    assert!(matches!(result, Err(AuthError::TokenIntegrity { .. })));
    assert!(!manager.ledger().is_active(&fid).await.expect("ledger"));
}

// ===========================================================================
// Logout and expiry
// ===========================================================================

#[tokio::test]
async fn test_invalidate_family_revokes_refresh_but_not_access() {
    let (_harness, manager) = started().await;
    let (fid, refresh, access) = login(&manager, "alice", 42).await;

    manager.invalidate_family(&fid).await.expect("invalidate");

    let result = manager.reissue_token_pair(&refresh).await;
    assert!(matches!(result, Err(AuthError::TokenIntegrity { .. })));
    manager
        .decode_token(&access, TokenType::Access, DecodeOptions::default())
        .await
        .expect("access tokens are stateless");
}

#[tokio::test]
async fn test_expired_access_token_needs_allow_expired() {
    let (_harness, manager) = started().await;
    let key = manager.keys().latest().expect("signing key");
    let fid = FamilyId::derive("alice", 42);
    let now = unix_now();
    let token = sign_claims(
        &key,
        TokenType::Access,
        &json!({
            "iss": "keyward-auth-service",
            "sub": "alice",
            "sid": 42,
            "fid": fid.as_str(),
            "jti": "j1",
            "iat": now - 600,
            "exp": now - 300,
        }),
    );

    let result = manager.decode_token(&token, TokenType::Access, DecodeOptions::default()).await;
    assert!(matches!(result, Err(AuthError::TokenExpired)));

    let claims = manager
        .decode_token(&token, TokenType::Access, DecodeOptions::allow_expired())
        .await
        .expect("expiry check disabled");
    assert_eq!(claims.fid, fid.as_str());
}

#[tokio::test]
async fn test_expired_refresh_token_does_not_invalidate_family() {
    let (_harness, manager) = started().await;
    let (fid, _, _) = login(&manager, "alice", 42).await;
    let key = manager.keys().latest().expect("signing key");
    let now = unix_now();
    let token = sign_claims(
        &key,
        TokenType::Refresh,
        &json!({
            "iss": "keyward-auth-service",
            "sub": "alice",
            "sid": 42,
            "fid": fid.as_str(),
            "jti": "stale",
            "iat": now - 1200,
            "nbf": now - 1170,
            "exp": now - 600,
        }),
    );

    let result = manager.reissue_token_pair(&token).await;
    assert!(matches!(result, Err(AuthError::TokenExpired)));
    assert!(manager.ledger().is_active(&fid).await.expect("ledger"));
}
