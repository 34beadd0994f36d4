//! In-memory coordination store implementation.
//!
//! This module provides [`MemoryCoordinationStore`], an in-memory
//! implementation of [`CoordinationStore`] for tests, development, and
//! single-process deployments.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Typed values**: Strings, hashes, and lists share one keyspace, and a
//!   type mismatch yields [`StorageError::WrongType`]
//! - **TTL support**: Expired keys are invisible immediately and reclaimed by
//!   a background task
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - State is only shared between clones within one process, so multi-process
//!   coordination needs a networked backend
//! - TTL cleanup runs every second; reads check expiry eagerly
//! - Expiry follows the Tokio clock, so paused-time tests control it

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::{
    select,
    sync::watch,
    time::{Instant, sleep},
};

use crate::{
    backend::{CoordinationStore, resolve_list_range},
    error::{StorageError, StorageResult},
};

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

#[derive(Debug, Clone)]
enum Value {
    String(String),
    Hash(BTreeMap<String, String>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self { value, expires_at: None }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = BTreeMap<String, Entry>;

/// Returns the entry for `key` if it exists and has not expired.
fn live<'a>(data: &'a Keyspace, key: &str) -> Option<&'a Entry> {
    data.get(key).filter(|entry| !entry.is_expired(Instant::now()))
}

/// Drops `key` if its TTL has elapsed, then returns the live entry, if any.
fn live_mut<'a>(data: &'a mut Keyspace, key: &str) -> Option<&'a mut Entry> {
    if data.get(key).is_some_and(|entry| entry.is_expired(Instant::now())) {
        data.remove(key);
    }
    data.get_mut(key)
}

/// In-memory coordination store.
///
/// # Cloning
///
/// `MemoryCoordinationStore` is cheaply cloneable via [`Arc`]. All clones
/// share the same keyspace, which lets tests model several "processes" with
/// clones of one store.
///
/// # Shutdown
///
/// The background TTL cleanup task stops automatically when all clones are
/// dropped. [`shutdown`](Self::shutdown) stops it explicitly.
#[derive(Clone)]
pub struct MemoryCoordinationStore {
    data: Arc<RwLock<Keyspace>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryCoordinationStore {
    /// Creates a new in-memory coordination store.
    ///
    /// This spawns the TTL cleanup task and must be called from within a
    /// Tokio runtime.
    ///
    /// # Example
    ///
    /// ```
    /// use keyward_storage::MemoryCoordinationStore;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let store = MemoryCoordinationStore::new();
    ///     // store is now ready for use
    /// }
    /// ```
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let store = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        let data = Arc::clone(&store.data);
        tokio::spawn(async move {
            Self::cleanup_expired_keys(data, shutdown_rx).await;
        });

        store
    }

    /// Background task to reclaim expired keys.
    ///
    /// Holds only the keyspace, not a store clone, so dropping the last
    /// store handle closes the watch channel and ends the task.
    async fn cleanup_expired_keys(data: Arc<RwLock<Keyspace>>, mut shutdown_rx: watch::Receiver<()>) {
        loop {
            select! {
                _ = sleep(Duration::from_secs(1)) => {}
                _ = shutdown_rx.changed() => {
                    return;
                }
            }

            let now = Instant::now();
            let expired: Vec<String> = {
                let guard = data.read();
                guard
                    .iter()
                    .filter(|(_, entry)| entry.is_expired(now))
                    .map(|(key, _)| key.clone())
                    .collect()
            };

            if !expired.is_empty() {
                let mut guard = data.write();
                for key in expired {
                    // Re-check: the key may have been rewritten since the scan.
                    if guard.get(&key).is_some_and(|entry| entry.is_expired(now)) {
                        guard.remove(&key);
                    }
                }
            }
        }
    }

    /// Explicitly signals the background TTL cleanup task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Returns the remaining time-to-live of a key, if it has one.
    ///
    /// Exposed for tests that assert on ledger and flag expiry.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let data = self.data.read();
        live(&data, key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.read().values().filter(|entry| !entry.is_expired(now)).count()
    }

    /// Returns `true` if the store holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCoordinationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryCoordinationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCoordinationStore").field("keys", &self.len()).finish()
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let data = self.data.read();
        match live(&data, key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(_) => Err(StorageError::wrong_type(key)),
        }
    }

    #[tracing::instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        data.insert(key.to_owned(), Entry::new(Value::String(value.to_owned())));
        Ok(())
    }

    #[tracing::instrument(skip(self, value))]
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> StorageResult<()> {
        let mut data = self.data.write();
        data.insert(
            key.to_owned(),
            Entry { value: Value::String(value.to_owned()), expires_at: Some(Instant::now() + ttl) },
        );
        Ok(())
    }

    #[tracing::instrument(skip(self, value))]
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> StorageResult<bool> {
        let mut data = self.data.write();
        if live_mut(&mut data, key).is_some() {
            return Ok(false);
        }

        data.insert(
            key.to_owned(),
            Entry {
                value: Value::String(value.to_owned()),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut data = self.data.write();
        let existed = live_mut(&mut data, key).is_some();
        data.remove(key);
        Ok(existed)
    }

    #[tracing::instrument(skip(self))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let data = self.data.read();
        Ok(live(&data, key).is_some())
    }

    #[tracing::instrument(skip(self))]
    async fn expire(&self, key: &str, ttl: Duration) -> StorageResult<bool> {
        let mut data = self.data.write();
        match live_mut(&mut data, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn hash_get(&self, key: &str, field: &str) -> StorageResult<Option<String>> {
        let data = self.data.read();
        match live(&data, key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Hash(fields)) => Ok(fields.get(field).cloned()),
            Some(_) => Err(StorageError::wrong_type(key)),
        }
    }

    #[tracing::instrument(skip(self, value))]
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        match live_mut(&mut data, key) {
            Some(Entry { value: Value::Hash(fields), .. }) => {
                fields.insert(field.to_owned(), value.to_owned());
            },
            Some(_) => return Err(StorageError::wrong_type(key)),
            None => {
                let fields = BTreeMap::from([(field.to_owned(), value.to_owned())]);
                data.insert(key.to_owned(), Entry::new(Value::Hash(fields)));
            },
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn hash_delete(&self, key: &str, field: &str) -> StorageResult<bool> {
        let mut data = self.data.write();
        let (removed, now_empty) = match live_mut(&mut data, key) {
            Some(Entry { value: Value::Hash(fields), .. }) => {
                (fields.remove(field).is_some(), fields.is_empty())
            },
            Some(_) => return Err(StorageError::wrong_type(key)),
            None => return Ok(false),
        };
        if now_empty {
            data.remove(key);
        }
        Ok(removed)
    }

    #[tracing::instrument(skip(self))]
    async fn hash_get_all(&self, key: &str) -> StorageResult<BTreeMap<String, String>> {
        let data = self.data.read();
        match live(&data, key).map(|entry| &entry.value) {
            None => Ok(BTreeMap::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(StorageError::wrong_type(key)),
        }
    }

    #[tracing::instrument(skip(self, value))]
    async fn list_push_front(&self, key: &str, value: &str) -> StorageResult<usize> {
        let mut data = self.data.write();
        match live_mut(&mut data, key) {
            Some(Entry { value: Value::List(items), .. }) => {
                items.push_front(value.to_owned());
                Ok(items.len())
            },
            Some(_) => Err(StorageError::wrong_type(key)),
            None => {
                let items = VecDeque::from([value.to_owned()]);
                data.insert(key.to_owned(), Entry::new(Value::List(items)));
                Ok(1)
            },
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> StorageResult<Vec<String>> {
        let data = self.data.read();
        match live(&data, key).map(|entry| &entry.value) {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => Ok(resolve_list_range(items.len(), start, stop)
                .map(|(lo, hi)| items.range(lo..=hi).cloned().collect())
                .unwrap_or_default()),
            Some(_) => Err(StorageError::wrong_type(key)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn list_trim(&self, key: &str, start: isize, stop: isize) -> StorageResult<()> {
        let mut data = self.data.write();
        let emptied = match live_mut(&mut data, key) {
            None => return Ok(()),
            Some(Entry { value: Value::List(items), .. }) => {
                match resolve_list_range(items.len(), start, stop) {
                    Some((lo, hi)) => {
                        items.truncate(hi + 1);
                        items.drain(..lo);
                        false
                    },
                    None => true,
                }
            },
            Some(_) => return Err(StorageError::wrong_type(key)),
        };

        if emptied {
            data.remove(key);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_len(&self, key: &str) -> StorageResult<usize> {
        let data = self.data.read();
        match live(&data, key).map(|entry| &entry.value) {
            None => Ok(0),
            Some(Value::List(items)) => Ok(items.len()),
            Some(_) => Err(StorageError::wrong_type(key)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<()> {
        // Try to acquire read lock to verify we're not deadlocked
        let _unused = self.data.read();
        Ok(())
    }
}
