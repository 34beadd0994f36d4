//! Conformance test suite for [`CoordinationStore`] implementations.
//!
//! Every backend, in-memory or networked, can run the same suite to check
//! that it honours the contract the token service relies on: atomic
//! insert-if-absent, TTL expiry, and Redis-style list indexing.
//!
//! # Usage
//!
//! Enable the `testutil` feature and call each conformance function with
//! a fresh store instance:
//!
//! ```no_run
//! use keyward_storage::conformance;
//! use keyward_storage::MemoryCoordinationStore;
//!
//! #[tokio::test]
//! async fn string_get_returns_none_for_missing_key() {
//!     conformance::string_get_returns_none_for_missing_key(&MemoryCoordinationStore::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | String | get/set/delete semantics |
//! | Conditional | `set_if_absent` exclusivity |
//! | TTL | expiry of strings, lists, and flags |
//! | Hash | field-level reads and writes |
//! | List | push order, range, trim, length |
//! | Concurrent | exactly-one-winner under contention |

use std::{sync::Arc, time::Duration};

use crate::{backend::CoordinationStore, error::StorageError};

// ============================================================================
// String: get/set/delete semantics
// ============================================================================

/// `get` on a nonexistent key returns `Ok(None)`.
pub async fn string_get_returns_none_for_missing_key<S: CoordinationStore + ?Sized>(store: &S) {
    let result = store.get("str:missing").await;
    assert!(result.is_ok(), "get should not error on missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None);
}

/// `set` then `get` round-trips the value, and `set` overwrites.
pub async fn string_set_then_get_and_overwrite<S: CoordinationStore + ?Sized>(store: &S) {
    store.set("str:k", "original").await.expect("set");
    assert_eq!(store.get("str:k").await.expect("get").as_deref(), Some("original"));

    store.set("str:k", "updated").await.expect("overwrite");
    assert_eq!(store.get("str:k").await.expect("get").as_deref(), Some("updated"));
}

/// `delete` reports whether a live key was removed.
pub async fn string_delete_reports_removal<S: CoordinationStore + ?Sized>(store: &S) {
    store.set("str:del", "v").await.expect("set");

    assert!(store.delete("str:del").await.expect("delete"), "first delete removes the key");
    assert!(!store.delete("str:del").await.expect("delete"), "second delete is a no-op");
    assert!(!store.exists("str:del").await.expect("exists"));
}

// ============================================================================
// Conditional: set_if_absent exclusivity
// ============================================================================

/// The first `set_if_absent` wins; later ones leave the value untouched.
pub async fn conditional_first_writer_wins<S: CoordinationStore + ?Sized>(store: &S) {
    assert!(store.set_if_absent("nx:k", "first", None).await.expect("first"));
    assert!(!store.set_if_absent("nx:k", "second", None).await.expect("second"));
    assert_eq!(store.get("nx:k").await.expect("get").as_deref(), Some("first"));
}

/// `set_if_absent` succeeds again once the previous holder's TTL elapses.
pub async fn conditional_expired_key_counts_as_absent<S: CoordinationStore + ?Sized>(store: &S) {
    assert!(
        store
            .set_if_absent("nx:ttl", "holder-1", Some(Duration::from_millis(30)))
            .await
            .expect("first")
    );
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert!(
        store.set_if_absent("nx:ttl", "holder-2", None).await.expect("second"),
        "expired lock must be reclaimable"
    );
}

/// `set_if_absent` refuses to clobber a key of another type.
pub async fn conditional_respects_non_string_keys<S: CoordinationStore + ?Sized>(store: &S) {
    store.list_push_front("nx:list", "x").await.expect("push");
    assert!(!store.set_if_absent("nx:list", "v", None).await.expect("set_if_absent"));
    assert_eq!(store.list_len("nx:list").await.expect("len"), 1);
}

// ============================================================================
// TTL: expiry of strings, lists, and flags
// ============================================================================

/// A key written with `set_with_ttl` disappears after its TTL.
pub async fn ttl_key_expires<S: CoordinationStore + ?Sized>(store: &S) {
    store.set_with_ttl("ttl:k", "v", Duration::from_millis(30)).await.expect("set_with_ttl");
    assert!(store.exists("ttl:k").await.expect("exists"));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.get("ttl:k").await.expect("get"), None, "key should have expired");
}

/// `expire` attaches a TTL to an existing list.
pub async fn ttl_expire_applies_to_lists<S: CoordinationStore + ?Sized>(store: &S) {
    store.list_push_front("ttl:list", "a").await.expect("push");
    assert!(store.expire("ttl:list", Duration::from_millis(30)).await.expect("expire"));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.list_len("ttl:list").await.expect("len"), 0, "list should have expired");
}

/// `expire` on a missing key reports `false`.
pub async fn ttl_expire_missing_key_returns_false<S: CoordinationStore + ?Sized>(store: &S) {
    assert!(!store.expire("ttl:missing", Duration::from_secs(1)).await.expect("expire"));
}

/// A plain `set` clears any previous TTL.
pub async fn ttl_overwrite_clears_ttl<S: CoordinationStore + ?Sized>(store: &S) {
    store.set_with_ttl("ttl:ow", "temp", Duration::from_millis(30)).await.expect("set_with_ttl");
    store.set("ttl:ow", "permanent").await.expect("set");

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.get("ttl:ow").await.expect("get").as_deref(), Some("permanent"));
}

// ============================================================================
// Hash: field-level reads and writes
// ============================================================================

/// Hash fields are written independently and read back together.
pub async fn hash_fields_roundtrip<S: CoordinationStore + ?Sized>(store: &S) {
    store.hash_set("hash:k", "kid-1", "pem-1").await.expect("hset");
    store.hash_set("hash:k", "kid-2", "pem-2").await.expect("hset");

    assert_eq!(store.hash_get("hash:k", "kid-1").await.expect("hget").as_deref(), Some("pem-1"));
    assert_eq!(store.hash_get("hash:k", "kid-3").await.expect("hget"), None);

    let all = store.hash_get_all("hash:k").await.expect("hgetall");
    assert_eq!(all.len(), 2);
    assert_eq!(all.get("kid-2").map(String::as_str), Some("pem-2"));
}

/// Deleting a field leaves the others readable; deleting the last field
/// removes the hash.
pub async fn hash_delete_removes_fields<S: CoordinationStore + ?Sized>(store: &S) {
    store.hash_set("hash:del", "kid-1", "pem-1").await.expect("hset");
    store.hash_set("hash:del", "kid-2", "pem-2").await.expect("hset");

    assert!(store.hash_delete("hash:del", "kid-1").await.expect("hdel"));
    assert!(!store.hash_delete("hash:del", "kid-1").await.expect("hdel"));
    assert_eq!(store.hash_get("hash:del", "kid-2").await.expect("hget").as_deref(), Some("pem-2"));

    assert!(store.hash_delete("hash:del", "kid-2").await.expect("hdel"));
    assert!(!store.exists("hash:del").await.expect("exists"));
    assert!(!store.hash_delete("hash:missing", "kid-1").await.expect("hdel"));
}

/// Reading a missing hash yields an empty map.
pub async fn hash_missing_key_is_empty<S: CoordinationStore + ?Sized>(store: &S) {
    assert!(store.hash_get_all("hash:missing").await.expect("hgetall").is_empty());
}

// ============================================================================
// List: push order, range, trim, length
// ============================================================================

/// `list_push_front` puts the newest element at index 0.
pub async fn list_push_front_orders_newest_first<S: CoordinationStore + ?Sized>(store: &S) {
    for (i, value) in ["a", "b", "c"].into_iter().enumerate() {
        let len = store.list_push_front("list:order", value).await.expect("push");
        assert_eq!(len, i + 1, "push must return the new length");
    }

    assert_eq!(store.list_range("list:order", 0, -1).await.expect("range"), vec!["c", "b", "a"]);
    assert_eq!(store.list_head("list:order").await.expect("head").as_deref(), Some("c"));
}

/// Negative and out-of-range indices are clamped.
pub async fn list_range_clamps_indices<S: CoordinationStore + ?Sized>(store: &S) {
    for value in ["a", "b", "c"] {
        store.list_push_front("list:clamp", value).await.expect("push");
    }

    assert_eq!(store.list_range("list:clamp", -2, 100).await.expect("range"), vec!["b", "a"]);
    assert!(store.list_range("list:clamp", 5, 10).await.expect("range").is_empty());
    assert!(store.list_range("list:missing", 0, -1).await.expect("range").is_empty());
}

/// `list_trim` keeps the head window and drops the tail.
pub async fn list_trim_keeps_head_window<S: CoordinationStore + ?Sized>(store: &S) {
    for value in ["1", "2", "3", "4", "5"] {
        store.list_push_front("list:trim", value).await.expect("push");
    }

    store.list_trim("list:trim", 0, 2).await.expect("trim");
    assert_eq!(store.list_range("list:trim", 0, -1).await.expect("range"), vec!["5", "4", "3"]);
    assert_eq!(store.list_len("list:trim").await.expect("len"), 3);
}

/// List operations against a string key fail with `WrongType`.
pub async fn list_ops_on_string_key_fail<S: CoordinationStore + ?Sized>(store: &S) {
    store.set("list:str", "v").await.expect("set");

    let result = store.list_push_front("list:str", "x").await;
    assert!(
        matches!(result, Err(StorageError::WrongType { .. })),
        "expected WrongType, got: {result:?}"
    );
}

// ============================================================================
// Concurrent: exactly-one-winner under contention
// ============================================================================

/// Of many concurrent `set_if_absent` callers exactly one wins.
pub async fn concurrent_set_if_absent_exactly_one_winner<S: CoordinationStore + ?Sized + 'static>(
    store: Arc<S>,
) {
    let mut handles = Vec::new();
    for i in 0u32..20 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .set_if_absent("cc:master", &format!("proc-{i}"), Some(Duration::from_secs(30)))
                .await
        }));
    }

    let mut winners = 0u32;
    for handle in handles {
        if handle.await.expect("task join").expect("set_if_absent") {
            winners += 1;
        }
    }

    assert_eq!(winners, 1, "exactly one caller should win the flag");
}

/// Concurrent pushes to one list are all retained.
pub async fn concurrent_pushes_are_not_lost<S: CoordinationStore + ?Sized + 'static>(store: Arc<S>) {
    let mut handles = Vec::new();
    for i in 0u32..20 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(
            async move { store.list_push_front("cc:list", &format!("e{i}")).await },
        ));
    }

    for handle in handles {
        handle.await.expect("task join").expect("push");
    }

    assert_eq!(store.list_len("cc:list").await.expect("len"), 20);
}

/// `health_check` succeeds on a healthy store.
pub async fn health_check_returns_healthy<S: CoordinationStore + ?Sized>(store: &S) {
    store.health_check().await.expect("health check should pass");
}

/// Runs every conformance check against a single store.
///
/// Each check uses its own key prefix, so sharing one instance is safe.
///
/// ```no_run
/// use std::sync::Arc;
/// use keyward_storage::{MemoryCoordinationStore, conformance};
///
/// #[tokio::test]
/// async fn memory_store_conformance() {
///     conformance::run_all(Arc::new(MemoryCoordinationStore::new())).await;
/// }
/// ```
pub async fn run_all<S: CoordinationStore + ?Sized + 'static>(store: Arc<S>) {
    // String
    string_get_returns_none_for_missing_key(store.as_ref()).await;
    string_set_then_get_and_overwrite(store.as_ref()).await;
    string_delete_reports_removal(store.as_ref()).await;

    // Conditional
    conditional_first_writer_wins(store.as_ref()).await;
    conditional_expired_key_counts_as_absent(store.as_ref()).await;
    conditional_respects_non_string_keys(store.as_ref()).await;

    // TTL
    ttl_key_expires(store.as_ref()).await;
    ttl_expire_applies_to_lists(store.as_ref()).await;
    ttl_expire_missing_key_returns_false(store.as_ref()).await;
    ttl_overwrite_clears_ttl(store.as_ref()).await;

    // Hash
    hash_fields_roundtrip(store.as_ref()).await;
    hash_missing_key_is_empty(store.as_ref()).await;

    // List
    list_push_front_orders_newest_first(store.as_ref()).await;
    list_range_clamps_indices(store.as_ref()).await;
    list_trim_keeps_head_window(store.as_ref()).await;
    list_ops_on_string_key_fail(store.as_ref()).await;

    // Concurrent
    concurrent_set_if_absent_exactly_one_winner(Arc::clone(&store)).await;
    concurrent_pushes_are_not_lost(Arc::clone(&store)).await;

    health_check_returns_healthy(store.as_ref()).await;
}
