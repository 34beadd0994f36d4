//! Storage trait for the signing-key history.
//!
//! This module provides the [`SigningKeyRecordStore`] trait that abstracts
//! the persistent store holding every signing key the deployment has used.
//! Production deployments back it with a relational table; the in-memory
//! implementation serves tests and single-process setups.
//!
//! # Usage
//!
//! ```no_run
//! use keyward_storage::StorageError;
//! use keyward_storage::auth::{SigningKeyRecord, SigningKeyRecordStore};
//!
//! async fn newest_keys<S: SigningKeyRecordStore>(
//!     store: &S,
//! ) -> Result<Vec<SigningKeyRecord>, StorageError> {
//!     store.list_valid_keys(3).await
//! }
//! ```

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::{
    auth::SigningKeyRecord,
    error::{StorageError, StorageResult},
};

/// Persistence layer for the signing-key history.
///
/// # Ordering
///
/// Listing methods return records newest first (by `epoch`). Ties are broken
/// by `kid` so that every process computes the same key set.
///
/// # Error Handling
///
/// Missing records yield [`StorageError::NotFound`]; duplicate inserts yield
/// [`StorageError::Conflict`]. Connectivity failures are reported as-is and
/// are never retried by callers in the token path.
#[async_trait]
pub trait SigningKeyRecordStore: Send + Sync {
    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if a record with the same `kid`
    /// already exists.
    async fn insert_key(&self, record: &SigningKeyRecord) -> StorageResult<()>;

    /// Fetches one record by key ID.
    async fn get_key(&self, kid: &str) -> StorageResult<Option<SigningKeyRecord>>;

    /// Lists up to `limit` non-expired records, newest first.
    async fn list_valid_keys(&self, limit: usize) -> StorageResult<Vec<SigningKeyRecord>>;

    /// Lists the key IDs of every expired record.
    async fn list_expired_kids(&self) -> StorageResult<Vec<String>>;

    /// Marks a record expired. Already-expired records keep their original
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the record does not exist.
    async fn mark_expired(&self, kid: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Marks a record rotated out. Already-rotated records keep their
    /// original timestamp.
    ///
    /// `rotated_by` names the operator of a manual rotation; when present the
    /// record is flagged as manually rotated.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the record does not exist.
    async fn mark_rotated_out(
        &self,
        kid: &str,
        at: DateTime<Utc>,
        rotated_by: Option<&str>,
    ) -> StorageResult<()>;

    /// Returns a rotated-out record to the active state, clearing its
    /// rotation timestamp and operator.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the record does not exist.
    async fn reinstate_key(&self, kid: &str) -> StorageResult<()>;

    /// Permanently removes a record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the record does not exist.
    async fn delete_key(&self, kid: &str) -> StorageResult<()>;

    /// Replaces the active key: inserts `new_key` and marks `old_kid`
    /// manually rotated out by `rotated_by`.
    ///
    /// The default implementation is two separate writes with a best-effort
    /// rollback of the insert. Implementations with transactions should
    /// override it.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The old key doesn't exist ([`StorageError::NotFound`])
    /// - The new key's `kid` already exists ([`StorageError::Conflict`])
    /// - The storage backend is unavailable
    async fn rotate_key(
        &self,
        old_kid: &str,
        new_key: &SigningKeyRecord,
        at: DateTime<Utc>,
        rotated_by: &str,
    ) -> StorageResult<()> {
        self.insert_key(new_key).await?;

        if let Err(e) = self.mark_rotated_out(old_kid, at, Some(rotated_by)).await {
            let _rollback = self.delete_key(&new_key.kid).await;
            return Err(e);
        }

        Ok(())
    }
}

/// Sorts records newest first, breaking ties by key ID.
fn newest_first(records: &mut [SigningKeyRecord]) {
    records.sort_by(|a, b| b.epoch.cmp(&a.epoch).then_with(|| a.kid.cmp(&b.kid)));
}

fn rotate_out(record: &mut SigningKeyRecord, at: DateTime<Utc>, rotated_by: Option<&str>) {
    if record.rotated_out_at.is_some() {
        return;
    }
    record.rotated_out_at = Some(at);
    if let Some(operator) = rotated_by {
        record.manual_rotation = true;
        record.rotated_out_by = Some(operator.to_owned());
    }
}

/// In-memory implementation of [`SigningKeyRecordStore`].
///
/// # Examples
///
/// ```
/// use keyward_storage::auth::{
///     MemorySigningKeyRecordStore, SigningKeyRecord, SigningKeyRecordStore,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemorySigningKeyRecordStore::new();
///
///     let record = SigningKeyRecord::builder()
///         .kid("k1")
///         .private_pem(b"sealed".to_vec())
///         .public_pem("-----BEGIN PUBLIC KEY-----\n...")
///         .build();
///
///     store.insert_key(&record).await?;
///     assert!(store.get_key("k1").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemorySigningKeyRecordStore {
    keys: Arc<RwLock<HashMap<String, SigningKeyRecord>>>,
}

impl MemorySigningKeyRecordStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl SigningKeyRecordStore for MemorySigningKeyRecordStore {
    #[tracing::instrument(skip(self, record), fields(kid = %record.kid))]
    async fn insert_key(&self, record: &SigningKeyRecord) -> StorageResult<()> {
        let mut keys = self.keys.write();

        if keys.contains_key(&record.kid) {
            return Err(StorageError::conflict(record.kid.clone()));
        }

        keys.insert(record.kid.clone(), record.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get_key(&self, kid: &str) -> StorageResult<Option<SigningKeyRecord>> {
        Ok(self.keys.read().get(kid).cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn list_valid_keys(&self, limit: usize) -> StorageResult<Vec<SigningKeyRecord>> {
        let mut valid: Vec<SigningKeyRecord> =
            self.keys.read().values().filter(|record| record.is_valid()).cloned().collect();

        newest_first(&mut valid);
        valid.truncate(limit);
        Ok(valid)
    }

    #[tracing::instrument(skip(self))]
    async fn list_expired_kids(&self) -> StorageResult<Vec<String>> {
        let mut kids: Vec<String> = self
            .keys
            .read()
            .values()
            .filter(|record| !record.is_valid())
            .map(|record| record.kid.clone())
            .collect();

        kids.sort();
        Ok(kids)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_expired(&self, kid: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let mut keys = self.keys.write();
        let record = keys.get_mut(kid).ok_or_else(|| StorageError::not_found(kid))?;
        record.expired_at.get_or_insert(at);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn mark_rotated_out(
        &self,
        kid: &str,
        at: DateTime<Utc>,
        rotated_by: Option<&str>,
    ) -> StorageResult<()> {
        let mut keys = self.keys.write();
        let record = keys.get_mut(kid).ok_or_else(|| StorageError::not_found(kid))?;
        rotate_out(record, at, rotated_by);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn reinstate_key(&self, kid: &str) -> StorageResult<()> {
        let mut keys = self.keys.write();
        let record = keys.get_mut(kid).ok_or_else(|| StorageError::not_found(kid))?;
        record.rotated_out_at = None;
        record.rotated_out_by = None;
        record.manual_rotation = false;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_key(&self, kid: &str) -> StorageResult<()> {
        self.keys.write().remove(kid).map(|_| ()).ok_or_else(|| StorageError::not_found(kid))
    }

    /// Atomic rotate: both writes happen under a single lock.
    #[tracing::instrument(skip(self, new_key), fields(new_kid = %new_key.kid))]
    async fn rotate_key(
        &self,
        old_kid: &str,
        new_key: &SigningKeyRecord,
        at: DateTime<Utc>,
        rotated_by: &str,
    ) -> StorageResult<()> {
        let mut keys = self.keys.write();

        if !keys.contains_key(old_kid) {
            return Err(StorageError::not_found(old_kid));
        }
        if keys.contains_key(&new_key.kid) {
            return Err(StorageError::conflict(new_key.kid.clone()));
        }

        if let Some(old) = keys.get_mut(old_kid) {
            rotate_out(old, at, Some(rotated_by));
        }
        keys.insert(new_key.kid.clone(), new_key.clone());

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::assert_not_found;

    fn make_record(kid: &str, age_minutes: i64) -> SigningKeyRecord {
        SigningKeyRecord::builder()
            .kid(kid)
            .epoch(Utc::now() - Duration::minutes(age_minutes))
            .private_pem(b"sealed".to_vec())
            .public_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n")
            .build()
    }

    #[tokio::test]
    async fn test_insert_and_get_key() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("k1", 0)).await.expect("insert should succeed");

        let retrieved = store.get_key("k1").await.expect("get should succeed");
        assert_eq!(retrieved.expect("record should exist").kid, "k1");
        assert!(store.get_key("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_duplicate_conflicts() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("k1", 0)).await.unwrap();

        let result = store.insert_key(&make_record("k1", 5)).await;
        assert!(matches!(result, Err(StorageError::Conflict { .. })));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_valid_keys_orders_newest_first_and_limits() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("old", 30)).await.unwrap();
        store.insert_key(&make_record("new", 0)).await.unwrap();
        store.insert_key(&make_record("mid", 10)).await.unwrap();
        store.insert_key(&make_record("gone", 5)).await.unwrap();
        store.mark_expired("gone", Utc::now()).await.unwrap();

        let all = store.list_valid_keys(10).await.unwrap();
        let kids: Vec<&str> = all.iter().map(|r| r.kid.as_str()).collect();
        assert_eq!(kids, vec!["new", "mid", "old"]);

        let top = store.list_valid_keys(2).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].kid, "new");
    }

    #[tokio::test]
    async fn test_list_expired_kids() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("b", 0)).await.unwrap();
        store.insert_key(&make_record("a", 1)).await.unwrap();
        store.insert_key(&make_record("c", 2)).await.unwrap();
        store.mark_expired("b", Utc::now()).await.unwrap();
        store.mark_expired("a", Utc::now()).await.unwrap();

        assert_eq!(store.list_expired_kids().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_mark_expired_keeps_first_timestamp() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("k1", 0)).await.unwrap();

        let first = Utc::now() - Duration::hours(1);
        store.mark_expired("k1", first).await.unwrap();
        store.mark_expired("k1", Utc::now()).await.unwrap();

        let record = store.get_key("k1").await.unwrap().unwrap();
        assert_eq!(record.expired_at, Some(first));
    }

    #[tokio::test]
    async fn test_mark_missing_key_not_found() {
        let store = MemorySigningKeyRecordStore::new();

        assert_not_found!(store.mark_expired("nope", Utc::now()).await);
        assert_not_found!(store.mark_rotated_out("nope", Utc::now(), None).await);
        assert_not_found!(store.reinstate_key("nope").await);
        assert_not_found!(store.delete_key("nope").await);
    }

    #[tokio::test]
    async fn test_rotate_key_success() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("old", 10)).await.unwrap();

        let new_key = make_record("new", 0);
        let at = Utc::now();
        store.rotate_key("old", &new_key, at, "ops").await.unwrap();

        let old = store.get_key("old").await.unwrap().unwrap();
        assert_eq!(old.rotated_out_at, Some(at));
        assert!(old.manual_rotation);
        assert_eq!(old.rotated_out_by.as_deref(), Some("ops"));
        assert!(old.is_valid());

        let new = store.get_key("new").await.unwrap().unwrap();
        assert!(new.is_active());
        assert!(!new.manual_rotation);
    }

    #[tokio::test]
    async fn test_mark_rotated_out_without_operator_is_not_manual() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("k1", 0)).await.unwrap();

        store.mark_rotated_out("k1", Utc::now(), None).await.unwrap();

        let record = store.get_key("k1").await.unwrap().unwrap();
        assert!(!record.is_active());
        assert!(!record.manual_rotation);
        assert!(record.rotated_out_by.is_none());
    }

    #[tokio::test]
    async fn test_reinstate_key_undoes_rotation() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("old", 10)).await.unwrap();
        store.rotate_key("old", &make_record("new", 0), Utc::now(), "ops").await.unwrap();

        store.delete_key("new").await.unwrap();
        store.reinstate_key("old").await.unwrap();

        let old = store.get_key("old").await.unwrap().unwrap();
        assert!(old.is_active());
        assert!(!old.manual_rotation);
        assert!(old.rotated_out_by.is_none());
    }

    #[tokio::test]
    async fn test_rotate_key_old_not_found() {
        let store = MemorySigningKeyRecordStore::new();

        assert_not_found!(
            store.rotate_key("missing", &make_record("new", 0), Utc::now(), "ops").await
        );
        assert!(store.get_key("new").await.unwrap().is_none(), "nothing should be written");
    }

    #[tokio::test]
    async fn test_rotate_key_new_already_exists() {
        let store = MemorySigningKeyRecordStore::new();
        store.insert_key(&make_record("old", 10)).await.unwrap();
        store.insert_key(&make_record("new", 0)).await.unwrap();

        let result = store.rotate_key("old", &make_record("new", 0), Utc::now(), "ops").await;
        assert!(matches!(result, Err(StorageError::Conflict { .. })));

        let old = store.get_key("old").await.unwrap().unwrap();
        assert!(old.is_active(), "old key must stay active when rotation fails");
    }

    /// Store that uses the trait's default `rotate_key` and refuses to mark
    /// anything rotated out.
    struct FailingRotationStore {
        inner: MemorySigningKeyRecordStore,
    }

    #[async_trait]
    impl SigningKeyRecordStore for FailingRotationStore {
        async fn insert_key(&self, record: &SigningKeyRecord) -> StorageResult<()> {
            self.inner.insert_key(record).await
        }

        async fn get_key(&self, kid: &str) -> StorageResult<Option<SigningKeyRecord>> {
            self.inner.get_key(kid).await
        }

        async fn list_valid_keys(&self, limit: usize) -> StorageResult<Vec<SigningKeyRecord>> {
            self.inner.list_valid_keys(limit).await
        }

        async fn list_expired_kids(&self) -> StorageResult<Vec<String>> {
            self.inner.list_expired_kids().await
        }

        async fn mark_expired(&self, kid: &str, at: DateTime<Utc>) -> StorageResult<()> {
            self.inner.mark_expired(kid, at).await
        }

        async fn mark_rotated_out(
            &self,
            _kid: &str,
            _at: DateTime<Utc>,
            _rotated_by: Option<&str>,
        ) -> StorageResult<()> {
            Err(StorageError::connection("database unavailable"))
        }

        async fn reinstate_key(&self, kid: &str) -> StorageResult<()> {
            self.inner.reinstate_key(kid).await
        }

        async fn delete_key(&self, kid: &str) -> StorageResult<()> {
            self.inner.delete_key(kid).await
        }
    }

    #[tokio::test]
    async fn test_default_rotate_key_rolls_back_insert() {
        let store = FailingRotationStore { inner: MemorySigningKeyRecordStore::new() };
        store.insert_key(&make_record("old", 10)).await.unwrap();

        let result = store.rotate_key("old", &make_record("new", 0), Utc::now(), "ops").await;
        assert!(matches!(result, Err(StorageError::Connection { .. })));
        assert!(store.get_key("new").await.unwrap().is_none(), "insert must be rolled back");
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let store = MemorySigningKeyRecordStore::new();
        let clone = store.clone();

        store.insert_key(&make_record("k1", 0)).await.unwrap();
        assert!(clone.get_key("k1").await.unwrap().is_some());
        assert!(!clone.is_empty());
    }
}
