//! Coordination store trait definition.
//!
//! This module defines [`CoordinationStore`], the shared low-latency store
//! that every worker process talks to. It carries the cross-process state of
//! the token service:
//!
//! - **Flags and locks**: bootstrap master election, abort signalling, key
//!   rotation locks and cooldowns, all via TTL-bounded conditional sets
//! - **Announcements**: the most recently activated signing key id
//! - **Hashes**: the published `kid -> public key` mapping
//! - **Lists**: refresh-token family ledgers, newest entry at the head
//!
//! The operation set mirrors a Redis-style server so that a production
//! backend is a thin mapping onto native commands. List indices follow Redis
//! semantics: `0` is the head, negative indices count back from the tail
//! (`-1` is the last element), and out-of-range bounds are clamped.
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`CoordinationStore`] trait
//! 2. Map backend-specific errors to [`StorageError`](crate::StorageError)
//! 3. Run the suite in [`conformance`](crate::conformance) against it
//!
//! See [`MemoryCoordinationStore`](crate::MemoryCoordinationStore) for a
//! reference implementation.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;

use crate::error::StorageResult;

/// Shared key/value store used for cross-process coordination.
///
/// Implementations must be thread-safe and every method must be atomic with
/// respect to other callers on the same key. No multi-key atomicity is
/// required.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`set_if_absent`](CoordinationStore::set_if_absent) | Atomic insert-if-absent with optional TTL |
/// | [`set_with_ttl`](CoordinationStore::set_with_ttl) | Store with automatic expiration |
/// | [`hash_set`](CoordinationStore::hash_set) / [`hash_get_all`](CoordinationStore::hash_get_all) | Field-level hash access |
/// | [`list_push_front`](CoordinationStore::list_push_front) / [`list_trim`](CoordinationStore::list_trim) | Bounded list maintenance |
/// | [`expire`](CoordinationStore::expire) | Attach a TTL to an existing key |
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use keyward_storage::{CoordinationStore, MemoryCoordinationStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryCoordinationStore::new();
///
/// let won = store.set_if_absent("lock", "worker-1", Some(Duration::from_secs(30))).await.unwrap();
/// let lost = store.set_if_absent("lock", "worker-2", Some(Duration::from_secs(30))).await.unwrap();
/// assert!(won);
/// assert!(!lost);
/// assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("worker-1"));
/// # });
/// ```
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Retrieves a plain string value.
    ///
    /// Returns `Ok(None)` when the key is absent or expired, and
    /// [`WrongType`](crate::StorageError::WrongType) when the key holds a
    /// hash or list.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Stores a plain string value, replacing any previous value and TTL.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Stores a plain string value that expires after `ttl`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()>;

    /// Atomically stores `value` only if `key` does not exist.
    ///
    /// Returns `true` when this caller won the write. Exactly one of any
    /// number of concurrent callers observes `true` for a given key while it
    /// is live. An expired key counts as absent.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StorageResult<bool>;

    /// Removes a key of any type. Returns `true` if a live key was removed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Returns whether a live key of any type exists.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Sets the remaining time-to-live of an existing key.
    ///
    /// Returns `false` if the key does not exist.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool>;

    /// Reads one field of a hash.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<String>>;

    /// Writes one field of a hash, creating the hash if needed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StorageResult<()>;

    /// Removes one field of a hash. Returns `true` if the field existed.
    ///
    /// A hash left without fields is removed.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn hash_delete(&self, key: &str, field: &str) -> StorageResult<bool>;

    /// Reads every field of a hash. A missing key yields an empty map.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn hash_get_all(&self, key: &str) -> StorageResult<BTreeMap<String, String>>;

    /// Prepends `value` to a list, creating it if needed.
    ///
    /// Returns the list length after the push.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_push_front(&self, key: &str, value: &str) -> StorageResult<usize>;

    /// Returns the elements between `start` and `stop`, both inclusive.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StorageResult<Vec<String>>;

    /// Retains only the elements between `start` and `stop`, both inclusive.
    ///
    /// A trim that leaves no elements removes the key.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> StorageResult<()>;

    /// Returns the length of a list. A missing key has length zero.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_len(&self, key: &str) -> StorageResult<usize>;

    /// Returns the head element of a list, if any.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_head(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.list_range(key, 0, 0).await?.into_iter().next())
    }

    /// Verifies that the store is reachable.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn health_check(&self) -> StorageResult<()>;
}

/// Resolves Redis-style inclusive `start..=stop` indices against a list of
/// `len` elements.
///
/// Returns `None` when the resolved range is empty.
///
/// ```
/// use keyward_storage::backend::resolve_list_range;
///
/// assert_eq!(resolve_list_range(5, 0, -1), Some((0, 4)));
/// assert_eq!(resolve_list_range(5, -2, 100), Some((3, 4)));
/// assert_eq!(resolve_list_range(5, 3, 1), None);
/// assert_eq!(resolve_list_range(0, 0, -1), None);
/// ```
#[must_use]
pub fn resolve_list_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = isize::try_from(len).ok()?;
    if len == 0 {
        return None;
    }

    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

    if start >= len || stop < 0 || start > stop {
        return None;
    }

    Some((usize::try_from(start).ok()?, usize::try_from(stop).ok()?))
}
