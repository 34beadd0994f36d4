//! # Keyward Authentication
//!
//! Token lifecycle and signing-key rotation for a fleet of token-service
//! processes that share no memory.
//!
//! This crate provides:
//! - **Key bootstrap**: master/follower election that discovers or creates
//!   signing keys and publishes the public key set
//! - **Token manager**: ES256 access and refresh tokens, with refresh-token
//!   families that detect replay and revoke the whole chain
//! - **Key poller**: background intake of keys announced by other processes
//! - **Key rotator**: locked, rate-limited manual rotation
//!
//! ## Features
//!
//! - Only ES256 is issued and accepted
//! - Symmetric algorithms (HS256, etc.) and `none` are explicitly rejected
//! - Private keys are encrypted at rest with ChaCha20-Poly1305
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keyward_authn::{
//!     DecodeOptions, FamilyId, Issuance, KeyBootstrap, KeyCipher, KeyFiles, KeyFilesConfig,
//!     KeyPoller, TokenConfig, TokenManager, TokenType,
//! };
//! use keyward_storage::{MemoryCoordinationStore, auth::MemorySigningKeyRecordStore};
//!
//! # async fn example(files_config: KeyFilesConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let coordination = Arc::new(MemoryCoordinationStore::new());
//! let records = Arc::new(MemorySigningKeyRecordStore::new());
//! let config = TokenConfig::default();
//!
//! let outcome = KeyBootstrap::builder()
//!     .coordination(coordination.clone())
//!     .records(records.clone())
//!     .cipher(KeyCipher::from_config(&files_config)?)
//!     .files(KeyFiles::new(files_config.clone()))
//!     .max_valid_keys(config.max_valid_keys())
//!     .build()
//!     .run()
//!     .await?;
//!
//! let manager = Arc::new(
//!     TokenManager::builder()
//!         .config(config.clone())
//!         .keys(outcome.keys)
//!         .coordination(coordination.clone())
//!         .records(records)
//!         .cipher(KeyCipher::from_config(&files_config)?)
//!         .build()?,
//! );
//! let poller = KeyPoller::spawn(manager.clone(), coordination, config.poll_interval());
//!
//! // Login
//! let fid = FamilyId::derive("alice", 42);
//! let refresh = manager.issue_refresh_token("alice", 42, &fid, Issuance::First).await?;
//! let access = manager.issue_access_token("alice", 42, &fid)?;
//!
//! // Request
//! let claims = manager.decode_token(&access, TokenType::Access, DecodeOptions::default()).await?;
//! println!("authenticated {}", claims.sub);
//!
//! // Refresh
//! let pair = manager.reissue_token_pair(&refresh).await?;
//! # let _ = pair;
//!
//! poller.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Master/follower key bootstrap.
pub mod bootstrap;
/// Token, bootstrap, rotation and key file configuration.
pub mod config;
/// Authentication error types.
pub mod error;
/// Refresh-token family ledger.
pub mod family;
/// Public key set document.
pub mod jwks;
/// JWT claims and header handling.
pub mod jwt;
/// Signing key metadata.
pub mod key;
/// Bounded in-memory key store.
pub mod keystore;
/// Token issuance and verification.
pub mod manager;
/// Key encryption and key files.
pub mod material;
/// Background key announcement poller.
pub mod poller;
/// Manual key rotation.
pub mod rotation;
/// Shared test utilities (feature-gated).
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Algorithm and kid validation.
pub mod validation;

// Re-export key types for convenience
pub use bootstrap::{BootstrapOutcome, BootstrapRole, KeyBootstrap};
pub use config::{BootstrapConfig, KeyFilesConfig, RotationConfig, TokenConfig};
pub use error::{AuthError, Result};
pub use family::{FamilyEntry, FamilyId, FamilyLedger};
pub use jwks::{Jwk, Jwks};
pub use jwt::{DecodeOptions, TokenClaims, TokenType};
pub use key::KeyMetadata;
pub use keystore::{KeySnapshot, KeyStore};
pub use manager::{Issuance, KeyIntake, TokenManager, TokenPair};
pub use material::{KeyCipher, KeyFiles, KidGenerator};
pub use poller::{KeyPoller, PollOutcome};
pub use rotation::{KeyRotator, RotationOutcome};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
