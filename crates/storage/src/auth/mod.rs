//! Signing-key persistence.
//!
//! This module contains the persisted representation of signing keys and the
//! storage trait through which the token service reads and writes the key
//! history.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐        ┌──────────────────┐        ┌──────────────┐
//! │ Master proc  │        │ Persistent store │        │ Follower proc│
//! │ creates keys │───────►│ (key history,    │◄───────│ loads keys   │
//! │ rotates keys │        │  source of truth)│        │ on startup   │
//! └──────────────┘        └──────────────────┘        └──────────────┘
//! ```
//!
//! # Storage Trait
//!
//! [`SigningKeyRecordStore`] provides the interface for key lifecycle
//! operations. Use [`MemorySigningKeyRecordStore`] for testing.
//!
//! # Examples
//!
//! ```
//! use keyward_storage::auth::{
//!     MemorySigningKeyRecordStore, SigningKeyRecord, SigningKeyRecordStore,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemorySigningKeyRecordStore::new();
//!
//! let key = SigningKeyRecord::builder()
//!     .kid("a1b2c3d4")
//!     .private_pem(b"sealed".to_vec())
//!     .public_pem("-----BEGIN PUBLIC KEY-----\n...")
//!     .build();
//!
//! store.insert_key(&key).await.unwrap();
//!
//! let valid = store.list_valid_keys(3).await.unwrap();
//! assert_eq!(valid.len(), 1);
//! # });
//! ```

mod signing_key;
mod store;

pub use signing_key::{DEFAULT_ALGORITHM, DEFAULT_CURVE, SigningKeyRecord};
pub use store::{MemorySigningKeyRecordStore, SigningKeyRecordStore};
