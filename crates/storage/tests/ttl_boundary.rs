//! TTL boundary condition tests for `MemoryCoordinationStore`.
//!
//! Covers zero TTL, very large TTL, TTL replacement, and TTL interaction
//! with the conditional writes used for distributed flags.

#![allow(clippy::expect_used, clippy::panic)]

use std::time::Duration;

use keyward_storage::{CoordinationStore, MemoryCoordinationStore};

// ============================================================================
// Paused clock
// ============================================================================

/// Expiry follows the Tokio clock: a flag outlives its TTL only while time
/// stands still.
#[tokio::test(start_paused = true)]
async fn test_ttl_follows_paused_clock() {
    let store = MemoryCoordinationStore::new();
    store.set_with_ttl("flag", "held", Duration::from_secs(120)).await.expect("set_with_ttl");

    tokio::time::advance(Duration::from_secs(119)).await;
    assert!(store.exists("flag").await.expect("exists"));
    assert_eq!(store.ttl("flag"), Some(Duration::from_secs(1)));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!store.exists("flag").await.expect("exists"));
    assert!(store.set_if_absent("flag", "next", None).await.expect("reclaim"));
}

// ============================================================================
// Zero TTL
// ============================================================================

/// A key set with `Duration::ZERO` TTL is immediately expired.
#[tokio::test]
async fn test_zero_ttl_is_immediately_expired() {
    let store = MemoryCoordinationStore::new();

    store.set_with_ttl("zero", "ephemeral", Duration::ZERO).await.expect("set_with_ttl");

    assert_eq!(store.get("zero").await.expect("get"), None);
    assert!(!store.exists("zero").await.expect("exists"));
}

/// A flag claimed with a zero TTL can be claimed again right away.
#[tokio::test]
async fn test_zero_ttl_flag_is_reclaimable() {
    let store = MemoryCoordinationStore::new();

    assert!(store.set_if_absent("flag", "a", Some(Duration::ZERO)).await.expect("first"));
    assert!(store.set_if_absent("flag", "b", None).await.expect("second"));
}

/// `expire` with zero TTL makes a list vanish.
#[tokio::test]
async fn test_zero_expire_removes_list() {
    let store = MemoryCoordinationStore::new();

    store.list_push_front("fam", "a:1").await.expect("push");
    assert!(store.expire("fam", Duration::ZERO).await.expect("expire"));
    assert_eq!(store.list_len("fam").await.expect("len"), 0);

    // Pushing afterwards starts a fresh list without the old TTL.
    assert_eq!(store.list_push_front("fam", "b:2").await.expect("push"), 1);
    assert_eq!(store.ttl("fam"), None);
}

// ============================================================================
// Large TTL
// ============================================================================

/// A key with a very large TTL should not overflow or panic.
#[tokio::test]
async fn test_large_ttl_no_overflow() {
    let store = MemoryCoordinationStore::new();
    let century = Duration::from_secs(100 * 365 * 24 * 60 * 60);

    store.set_with_ttl("long", "lived", century).await.expect("set_with_ttl");
    assert_eq!(store.get("long").await.expect("get").as_deref(), Some("lived"));
    assert!(store.ttl("long").is_some_and(|ttl| ttl > Duration::from_secs(60)));
}

// ============================================================================
// Replacement
// ============================================================================

/// A second `set_with_ttl` replaces the previous expiry.
#[tokio::test]
async fn test_set_with_ttl_replaces_expiry() {
    let store = MemoryCoordinationStore::new();

    store.set_with_ttl("k", "short", Duration::from_millis(20)).await.expect("first");
    store.set_with_ttl("k", "long", Duration::from_secs(60)).await.expect("second");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.get("k").await.expect("get").as_deref(), Some("long"));
}

/// Re-applying `expire` extends a ledger's lifetime.
#[tokio::test]
async fn test_expire_extends_lifetime() {
    let store = MemoryCoordinationStore::new();

    store.list_push_front("fam", "a:1").await.expect("push");
    store.expire("fam", Duration::from_millis(30)).await.expect("expire");
    store.expire("fam", Duration::from_secs(60)).await.expect("expire again");
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(store.list_len("fam").await.expect("len"), 1);
}

/// Hash writes to an expired hash start from an empty hash.
#[tokio::test]
async fn test_hash_set_after_expiry_starts_fresh() {
    let store = MemoryCoordinationStore::new();

    store.hash_set("h", "old", "1").await.expect("hash_set");
    store.expire("h", Duration::ZERO).await.expect("expire");
    store.hash_set("h", "new", "2").await.expect("hash_set");

    let all = store.hash_get_all("h").await.expect("hash_get_all");
    assert_eq!(all.len(), 1);
    assert!(all.contains_key("new"));
}
