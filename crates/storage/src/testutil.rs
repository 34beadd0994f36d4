//! Shared test utilities for storage testing.
//!
//! This module provides helpers for building signing-key records, an
//! always-failing store for error-path tests, a store that logs its writes
//! for ordering assertions, and assertion macros on
//! [`StorageResult`] values. It is feature-gated behind `testutil` to
//! prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! keyward-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use keyward_storage::testutil::{UnavailableStore, make_record};
//! ```

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    auth::{SigningKeyRecord, SigningKeyRecordStore},
    backend::CoordinationStore,
    error::{StorageError, StorageResult},
    memory::MemoryCoordinationStore,
};

/// Placeholder public key used where the PEM content does not matter.
pub const PLACEHOLDER_PUBLIC_PEM: &str =
    "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";

/// Create a signing-key record whose `epoch` lies `age_minutes` in the past.
///
/// The key material is placeholder bytes, so the record is only suitable for
/// tests that never sign or verify with it.
#[must_use]
pub fn make_record(kid: &str, age_minutes: i64) -> SigningKeyRecord {
    SigningKeyRecord::builder()
        .kid(kid)
        .epoch(Utc::now() - chrono::Duration::minutes(age_minutes))
        .private_pem(b"sealed".to_vec())
        .public_pem(PLACEHOLDER_PUBLIC_PEM)
        .build()
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict { .. })),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use keyward_storage::assert_not_found;
/// use keyward_storage::error::{StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::NotFound { key: "missing".into() });
/// assert_not_found!(result);
/// ```
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::NotFound { .. })),
            "expected StorageError::NotFound, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::NotFound { .. })),
            "{}: expected StorageError::NotFound, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
}

/// A store whose every operation fails with a connection error.
///
/// Implements both [`CoordinationStore`] and [`SigningKeyRecordStore`], so it
/// can stand in for either dependency when testing unavailability handling.
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn fail<T>() -> StorageResult<T> {
        Err(StorageError::connection("store unavailable"))
    }
}

#[async_trait]
impl CoordinationStore for UnavailableStore {
    async fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Self::fail()
    }

    async fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
        Self::fail()
    }

    async fn set_with_ttl(&self, _key: &str, _value: &str, _ttl: Duration) -> StorageResult<()> {
        Self::fail()
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<Duration>,
    ) -> StorageResult<bool> {
        Self::fail()
    }

    async fn delete(&self, _key: &str) -> StorageResult<bool> {
        Self::fail()
    }

    async fn exists(&self, _key: &str) -> StorageResult<bool> {
        Self::fail()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> StorageResult<bool> {
        Self::fail()
    }

    async fn hash_get(&self, _key: &str, _field: &str) -> StorageResult<Option<String>> {
        Self::fail()
    }

    async fn hash_set(&self, _key: &str, _field: &str, _value: &str) -> StorageResult<()> {
        Self::fail()
    }

    async fn hash_delete(&self, _key: &str, _field: &str) -> StorageResult<bool> {
        Self::fail()
    }

    async fn hash_get_all(&self, _key: &str) -> StorageResult<BTreeMap<String, String>> {
        Self::fail()
    }

    async fn list_push_front(&self, _key: &str, _value: &str) -> StorageResult<usize> {
        Self::fail()
    }

    async fn list_range(
        &self,
        _key: &str,
        _start: isize,
        _stop: isize,
    ) -> StorageResult<Vec<String>> {
        Self::fail()
    }

    async fn list_trim(&self, _key: &str, _start: isize, _stop: isize) -> StorageResult<()> {
        Self::fail()
    }

    async fn list_len(&self, _key: &str) -> StorageResult<usize> {
        Self::fail()
    }

    async fn health_check(&self) -> StorageResult<()> {
        Self::fail()
    }
}

#[async_trait]
impl SigningKeyRecordStore for UnavailableStore {
    async fn insert_key(&self, _record: &SigningKeyRecord) -> StorageResult<()> {
        Self::fail()
    }

    async fn get_key(&self, _kid: &str) -> StorageResult<Option<SigningKeyRecord>> {
        Self::fail()
    }

    async fn list_valid_keys(&self, _limit: usize) -> StorageResult<Vec<SigningKeyRecord>> {
        Self::fail()
    }

    async fn list_expired_kids(&self) -> StorageResult<Vec<String>> {
        Self::fail()
    }

    async fn mark_expired(&self, _kid: &str, _at: DateTime<Utc>) -> StorageResult<()> {
        Self::fail()
    }

    async fn mark_rotated_out(
        &self,
        _kid: &str,
        _at: DateTime<Utc>,
        _rotated_by: Option<&str>,
    ) -> StorageResult<()> {
        Self::fail()
    }

    async fn reinstate_key(&self, _kid: &str) -> StorageResult<()> {
        Self::fail()
    }

    async fn delete_key(&self, _kid: &str) -> StorageResult<()> {
        Self::fail()
    }
}

/// A [`MemoryCoordinationStore`] that logs every write.
///
/// Entries read `"<operation> <key>"`, with the field appended for hash
/// operations, e.g. `"hash_set auth:keys:public 123"`. Reads are not logged.
#[derive(Debug, Clone, Default)]
pub struct RecordingStore {
    inner: MemoryCoordinationStore,
    writes: Arc<Mutex<Vec<String>>>,
}

impl RecordingStore {
    /// Creates an empty store with an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes performed so far, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    /// Empties the log.
    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    fn log(&self, entry: String) {
        self.writes.lock().push(entry);
    }
}

#[async_trait]
impl CoordinationStore for RecordingStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.log(format!("set {key}"));
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()> {
        self.log(format!("set_with_ttl {key}"));
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StorageResult<bool> {
        self.log(format!("set_if_absent {key}"));
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.log(format!("delete {key}"));
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        self.log(format!("expire {key}"));
        self.inner.expire(key, ttl).await
    }

    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        self.inner.hash_get(key, field).await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StorageResult<()> {
        self.log(format!("hash_set {key} {field}"));
        self.inner.hash_set(key, field, value).await
    }

    async fn hash_delete(&self, key: &str, field: &str) -> StorageResult<bool> {
        self.log(format!("hash_delete {key} {field}"));
        self.inner.hash_delete(key, field).await
    }

    async fn hash_get_all(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        self.inner.hash_get_all(key).await
    }

    async fn list_push_front(&self, key: &str, value: &str) -> StorageResult<usize> {
        self.log(format!("list_push_front {key}"));
        self.inner.list_push_front(key, value).await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StorageResult<Vec<String>> {
        self.inner.list_range(key, start, stop).await
    }

    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> StorageResult<()> {
        self.log(format!("list_trim {key}"));
        self.inner.list_trim(key, start, stop).await
    }

    async fn list_len(&self, key: &str) -> StorageResult<usize> {
        self.inner.list_len(key).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_make_record_is_active_and_aged() {
        let record = make_record("k1", 10);
        assert!(record.is_active());
        assert!(record.epoch < Utc::now() - chrono::Duration::minutes(9));
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_everything() {
        let store = UnavailableStore;

        assert!(matches!(
            CoordinationStore::get(&store, "k").await,
            Err(StorageError::Connection { .. })
        ));
        assert!(matches!(store.list_head("k").await, Err(StorageError::Connection { .. })));
        assert!(matches!(store.get_key("k").await, Err(StorageError::Connection { .. })));
        assert!(store.health_check().await.is_err());
    }
}
