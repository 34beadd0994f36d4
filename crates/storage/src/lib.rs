//! Storage abstractions for the Keyward token service.
//!
//! The token service keeps no shared memory between worker processes. Every
//! piece of cross-process state lives in one of two external stores, and
//! this crate defines the traits through which the service reaches them:
//!
//! - [`CoordinationStore`]: a low-latency shared store (Redis-like) for
//!   distributed flags, key announcements, and refresh-token family ledgers
//! - [`auth::SigningKeyRecordStore`]: the durable signing-key history
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      keyward-authn                          │
//! │   KeyBootstrap │ TokenManager │ KeyPoller │ KeyRotator      │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │      CoordinationStore       │    SigningKeyRecordStore     │
//! │ (flags, announcements, lists)│     (signing-key history)    │
//! ├──────────────────────────────┼──────────────────────────────┤
//! │  MemoryCoordinationStore     │ MemorySigningKeyRecordStore  │
//! │  (testing, single process)   │ (testing, single process)    │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use keyward_storage::{CoordinationStore, MemoryCoordinationStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryCoordinationStore::new();
//!
//!     // Elect a single holder for a short-lived lock
//!     let won = store.set_if_absent("auth:bootstrap:master", "1", Some(Duration::from_secs(60))).await?;
//!     assert!(won);
//!
//!     // Maintain a bounded newest-first list
//!     store.list_push_front("auth:family:abc", "jti-1:1700000000").await?;
//!     store.list_trim("auth:family:abc", 0, 2).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`], which wraps potential
//! [`StorageError`] variants. Backends should map their internal errors
//! to these standardized error types.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module (record builders, an
//!   always-failing store, assertion macros) and the `conformance` suite for
//!   [`CoordinationStore`] implementations.

#![deny(unsafe_code)]

pub mod auth;
pub mod backend;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod memory;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

// Re-export primary types at crate root for convenience
pub use backend::CoordinationStore;
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryCoordinationStore;
pub use zeroize::Zeroizing;
