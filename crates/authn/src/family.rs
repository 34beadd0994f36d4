//! Refresh-token family ledger.
//!
//! A family is the chain of refresh tokens descending from one login. Its
//! ledger is a newest-first list of `"{jti}:{exp}"` entries in the
//! coordination store under `auth:family:{fid}`, capped and expiring with
//! the refresh lifetime. Only the head entry may be exchanged; presenting
//! anything else is a replay.

use std::{fmt, sync::Arc, time::Duration};

use keyward_storage::CoordinationStore;
use sha2::{Digest, Sha256};

use crate::error::{AuthError, Result};

/// Key prefix of family ledgers in the coordination store.
pub const FAMILY_KEY_PREFIX: &str = "auth:family:";

/// Identifier of a refresh-token family.
///
/// Derived deterministically from subject and session, so every login of
/// the same session maps to the same family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FamilyId(String);

impl FamilyId {
    /// Derives the family id: hex SHA-256 of `"{subject}:{session}"`.
    ///
    /// ```
    /// use keyward_authn::FamilyId;
    ///
    /// let fid = FamilyId::derive("alice", 42);
    /// assert_eq!(fid.as_str().len(), 64);
    /// assert_eq!(fid, FamilyId::derive("alice", 42));
    /// ```
    #[must_use]
    pub fn derive(subject: &str, session: i64) -> Self {
        let digest = Sha256::digest(format!("{subject}:{session}").as_bytes());
        Self(hex::encode(digest))
    }

    /// Wraps a family id taken from a token's `fid` claim.
    #[must_use]
    pub fn from_claim(fid: impl Into<String>) -> Self {
        Self(fid.into())
    }

    /// Returns the id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn ledger_key(&self) -> String {
        format!("{FAMILY_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One ledger entry: a refresh token's `jti` and `exp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyEntry {
    /// Token identifier.
    pub jti: String,
    /// Token expiry (Unix seconds).
    pub exp: u64,
}

impl FamilyEntry {
    /// Creates an entry.
    #[must_use]
    pub fn new(jti: impl Into<String>, exp: u64) -> Self {
        Self { jti: jti.into(), exp }
    }

    fn encode(&self) -> String {
        format!("{}:{}", self.jti, self.exp)
    }

    fn parse(raw: &str) -> Option<Self> {
        let (jti, exp) = raw.rsplit_once(':')?;
        if jti.is_empty() {
            return None;
        }
        Some(Self { jti: jti.to_owned(), exp: exp.parse().ok()? })
    }
}

/// Family ledgers over a [`CoordinationStore`].
#[derive(Clone)]
pub struct FamilyLedger {
    store: Arc<dyn CoordinationStore>,
    ttl: Duration,
    window: usize,
}

impl fmt::Debug for FamilyLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FamilyLedger")
            .field("ttl", &self.ttl)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl FamilyLedger {
    /// Creates a ledger whose entries live for `ttl` and keep at most
    /// `window` entries per family.
    #[must_use]
    pub fn new(store: Arc<dyn CoordinationStore>, ttl: Duration, window: usize) -> Self {
        Self { store, ttl, window: window.max(1) }
    }

    /// Returns `true` if the family has any entries.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CoordinationStoreUnavailable`] if the store fails.
    pub async fn is_active(&self, fid: &FamilyId) -> Result<bool> {
        let len = self
            .store
            .list_len(&fid.ledger_key())
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;
        Ok(len > 0)
    }

    /// Returns the newest entry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CoordinationStoreUnavailable`] if the store
    /// fails, or [`AuthError::TokenIntegrity`] if the head is malformed.
    pub async fn head(&self, fid: &FamilyId) -> Result<Option<FamilyEntry>> {
        let raw = self
            .store
            .list_head(&fid.ledger_key())
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;
        raw.map(|raw| {
            FamilyEntry::parse(&raw)
                .ok_or_else(|| AuthError::integrity(fid.as_str(), "malformed ledger entry"))
        })
        .transpose()
    }

    /// Returns all entries, newest first. Malformed entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CoordinationStoreUnavailable`] if the store fails.
    pub async fn entries(&self, fid: &FamilyId) -> Result<Vec<FamilyEntry>> {
        let raw = self
            .store
            .list_range(&fid.ledger_key(), 0, -1)
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;
        Ok(raw.iter().filter_map(|r| FamilyEntry::parse(r)).collect())
    }

    /// Pushes a new head, trims the tail to the window and refreshes the TTL.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CoordinationStoreUnavailable`] if the store fails.
    pub async fn push(&self, fid: &FamilyId, entry: &FamilyEntry) -> Result<()> {
        let key = fid.ledger_key();
        let stop = isize::try_from(self.window).unwrap_or(isize::MAX) - 1;

        self.store
            .list_push_front(&key, &entry.encode())
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;
        self.store.list_trim(&key, 0, stop).await.map_err(AuthError::CoordinationStoreUnavailable)?;
        self.store.expire(&key, self.ttl).await.map_err(AuthError::CoordinationStoreUnavailable)?;
        Ok(())
    }

    /// Deletes the family's ledger. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CoordinationStoreUnavailable`] if the store fails.
    pub async fn invalidate(&self, fid: &FamilyId) -> Result<bool> {
        self.store.delete(&fid.ledger_key()).await.map_err(AuthError::CoordinationStoreUnavailable)
    }

    /// Maximum entries kept per family.
    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }
}
