//! Process-local cache of signing keys.
//!
//! Readers clone an `Arc` of the current [`KeySnapshot`] and never block
//! writers for longer than the pointer swap. Writers build a new snapshot
//! and publish it under a short write section.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::key::KeyMetadata;

/// Immutable view of the key store at one point in time.
#[derive(Debug, Clone, Default)]
pub struct KeySnapshot {
    /// Keys in insertion order, oldest first.
    keys: Vec<Arc<KeyMetadata>>,
    /// Kid of the key new tokens are signed with.
    latest: Option<String>,
}

impl KeySnapshot {
    /// Looks up a key by kid.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&Arc<KeyMetadata>> {
        self.keys.iter().find(|k| k.kid() == kid)
    }

    /// Returns the signing key, if one has been promoted.
    #[must_use]
    pub fn latest(&self) -> Option<&Arc<KeyMetadata>> {
        self.latest.as_deref().and_then(|kid| self.get(kid))
    }

    /// Iterates over the keys, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<KeyMetadata>> {
        self.keys.iter()
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no keys are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Bounded, insertion-ordered map of kid to [`KeyMetadata`].
///
/// Inserting beyond the capacity evicts the oldest key that is not the
/// current latest.
///
/// # Example
///
/// ```
/// use keyward_authn::{KeyMetadata, KeyStore};
///
/// let store = KeyStore::new(3);
/// store.insert(KeyMetadata::generate("123")?, true);
///
/// assert_eq!(store.latest().map(|k| k.kid().to_owned()), Some("123".to_owned()));
/// # Ok::<(), keyward_authn::AuthError>(())
/// ```
#[derive(Debug)]
pub struct KeyStore {
    capacity: usize,
    snapshot: RwLock<Arc<KeySnapshot>>,
}

impl KeyStore {
    /// Creates an empty store holding at most `capacity` keys (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), snapshot: RwLock::new(Arc::new(KeySnapshot::default())) }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySnapshot> {
        self.snapshot.read().clone()
    }

    /// Inserts a key, optionally promoting it to latest.
    ///
    /// A key whose kid is already present replaces the existing entry in
    /// place. Returns the kids evicted to stay within capacity.
    pub fn insert(&self, key: KeyMetadata, promote: bool) -> Vec<String> {
        let key = Arc::new(key);
        let mut guard = self.snapshot.write();
        let mut next = KeySnapshot::clone(&guard);

        if let Some(slot) = next.keys.iter_mut().find(|k| k.kid() == key.kid()) {
            *slot = Arc::clone(&key);
        } else {
            next.keys.push(Arc::clone(&key));
        }
        if promote {
            next.latest = Some(key.kid().to_owned());
        }

        let mut evicted = Vec::new();
        while next.keys.len() > self.capacity {
            let victim = next
                .keys
                .iter()
                .position(|k| Some(k.kid()) != next.latest.as_deref())
                .unwrap_or(0);
            let removed = next.keys.remove(victim);
            tracing::debug!(kid = removed.kid(), "evicted signing key from key store");
            evicted.push(removed.kid().to_owned());
        }

        *guard = Arc::new(next);
        evicted
    }

    /// Replaces the current contents with an earlier snapshot.
    pub fn restore(&self, snapshot: Arc<KeySnapshot>) {
        *self.snapshot.write() = snapshot;
    }

    /// Looks up a key by kid.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<KeyMetadata>> {
        self.snapshot().get(kid).cloned()
    }

    /// Returns the current signing key.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<KeyMetadata>> {
        self.snapshot().latest().cloned()
    }

    /// Returns the kid of the current signing key.
    #[must_use]
    pub fn latest_kid(&self) -> Option<String> {
        self.snapshot.read().latest.clone()
    }

    /// Returns `true` if `kid` is held.
    #[must_use]
    pub fn contains(&self, kid: &str) -> bool {
        self.snapshot.read().get(kid).is_some()
    }

    /// Kids held, oldest first.
    #[must_use]
    pub fn kids(&self) -> Vec<String> {
        self.snapshot.read().keys.iter().map(|k| k.kid().to_owned()).collect()
    }

    /// Number of keys held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    /// Returns `true` if no keys are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    /// Maximum number of keys held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
