//! Shared test utilities for token and key lifecycle testing.
//!
//! This module provides short-lived configurations, a [`TestHarness`] that
//! wires in-memory stores and a temporary key directory into bootstraps,
//! managers and rotators, and helpers for crafting raw or hand-signed JWTs
//! (for attack testing). It is feature-gated behind `testutil` to prevent
//! leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! keyward-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use keyward_authn::testutil::{TestHarness, craft_raw_jwt};
//! ```

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Header, encode};
use keyward_storage::{MemoryCoordinationStore, auth::MemorySigningKeyRecordStore};
use parking_lot::Mutex;
use tempfile::TempDir;

use crate::{
    bootstrap::{BootstrapOutcome, KeyBootstrap},
    config::{BootstrapConfig, KeyFilesConfig, RotationConfig, TokenConfig},
    error::Result,
    jwt::TokenType,
    key::KeyMetadata,
    keystore::KeyStore,
    manager::TokenManager,
    material::{KeyCipher, KeyFiles, KidGenerator, default_kid_generator},
    rotation::KeyRotator,
};

/// Base64url encryption key decoding to the bytes `0..32`.
pub const TEST_ENCRYPTION_KEY: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";

/// Token configuration with short lifetimes: access 60 s, leeway 30 s,
/// refresh 600 s.
///
/// A refresh token's `nbf` is `iat + 30`, which is within the leeway, so
/// freshly issued refresh tokens are immediately exchangeable.
///
/// # Panics
///
/// Panics if the configuration is rejected (should not happen).
#[allow(clippy::expect_used)]
pub fn test_token_config() -> TokenConfig {
    TokenConfig::builder()
        .access_lifetime(Duration::from_secs(60))
        .leeway(Duration::from_secs(30))
        .refresh_lifetime(Duration::from_secs(600))
        .build()
        .expect("test token config is valid")
}

/// Bootstrap configuration with a 10 ms follower poll and a 5 s follower
/// timeout.
pub fn fast_bootstrap_config() -> BootstrapConfig {
    BootstrapConfig::builder()
        .follower_poll_interval(Duration::from_millis(10))
        .build()
        .with_follower_timeout(Some(Duration::from_secs(5)))
}

/// Kid generator handing out `kids` in order, then random kids.
pub fn sequential_kids(kids: &[&str]) -> KidGenerator {
    let queue: Mutex<VecDeque<String>> =
        Mutex::new(kids.iter().map(|k| (*k).to_owned()).collect());
    let fallback = default_kid_generator();
    Arc::new(move || queue.lock().pop_front().unwrap_or_else(|| fallback()))
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

/// In-memory stores and a temporary key directory shared by every process
/// simulated in a test.
///
/// Must be created within a Tokio runtime.
pub struct TestHarness {
    /// Shared coordination store.
    pub coordination: Arc<MemoryCoordinationStore>,
    /// Shared persistent key store.
    pub records: Arc<MemorySigningKeyRecordStore>,
    /// Key files configuration rooted in [`dir`](Self::dir).
    pub files_config: KeyFilesConfig,
    /// Temporary key directory, removed on drop.
    pub dir: TempDir,
}

impl TestHarness {
    /// Creates empty stores and an empty key directory.
    ///
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let files_config = KeyFilesConfig::builder()
            .jwks_path(dir.path().join("jwks.json"))
            .private_dir(dir.path().join("private"))
            .public_dir(dir.path().join("public"))
            .encryption_key(TEST_ENCRYPTION_KEY)
            .build()
            .expect("test files config is valid");

        Self {
            coordination: Arc::new(MemoryCoordinationStore::new()),
            records: Arc::new(MemorySigningKeyRecordStore::new()),
            files_config,
            dir,
        }
    }

    /// Cipher keyed with [`TEST_ENCRYPTION_KEY`].
    ///
    /// # Panics
    ///
    /// Panics if the key is rejected (should not happen).
    #[allow(clippy::expect_used)]
    pub fn cipher(&self) -> KeyCipher {
        KeyCipher::from_config(&self.files_config).expect("test cipher")
    }

    /// Key files rooted in the temporary directory.
    pub fn files(&self) -> KeyFiles {
        KeyFiles::new(self.files_config.clone())
    }

    /// A bootstrap for one simulated process, allocating `kids` in order.
    pub fn bootstrap(&self, kids: &[&str]) -> KeyBootstrap {
        KeyBootstrap::builder()
            .coordination(self.coordination.clone())
            .records(self.records.clone())
            .cipher(self.cipher())
            .files(self.files())
            .max_valid_keys(test_token_config().max_valid_keys())
            .config(fast_bootstrap_config())
            .kid_generator(sequential_kids(kids))
            .build()
    }

    /// A token manager over `keys` and the shared stores.
    ///
    /// # Panics
    ///
    /// Panics if the test configuration is rejected (should not happen).
    #[allow(clippy::expect_used)]
    pub fn manager(&self, keys: Arc<KeyStore>) -> Arc<TokenManager> {
        Arc::new(
            TokenManager::builder()
                .config(test_token_config())
                .keys(keys)
                .coordination(self.coordination.clone())
                .records(self.records.clone())
                .cipher(self.cipher())
                .build()
                .expect("test manager"),
        )
    }

    /// Bootstraps one simulated process and returns its manager.
    ///
    /// # Errors
    ///
    /// Returns the bootstrap error.
    pub async fn start(&self, kids: &[&str]) -> Result<(BootstrapOutcome, Arc<TokenManager>)> {
        let outcome = self.bootstrap(kids).run().await?;
        let manager = self.manager(Arc::clone(&outcome.keys));
        Ok((outcome, manager))
    }

    /// A rotator acting on `manager`, allocating `kids` in order.
    pub fn rotator(&self, manager: &Arc<TokenManager>, kids: &[&str]) -> KeyRotator {
        self.rotator_with_config(manager, kids, RotationConfig::default())
    }

    /// A rotator with an explicit rotation configuration.
    pub fn rotator_with_config(
        &self,
        manager: &Arc<TokenManager>,
        kids: &[&str],
        config: RotationConfig,
    ) -> KeyRotator {
        KeyRotator::builder()
            .coordination(self.coordination.clone())
            .records(self.records.clone())
            .cipher(self.cipher())
            .files(self.files())
            .manager(Arc::clone(manager))
            .config(config)
            .kid_generator(sequential_kids(kids))
            .build()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Crafts a raw JWT string from arbitrary header and payload JSON values.
///
/// The signature part is a fixed dummy value. Useful for testing rejection
/// of malformed or malicious tokens before signature verification.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(header_json.to_string().as_bytes());
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json.to_string().as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(b"fake-signature");
    format!("{header_b64}.{payload_b64}.{sig_b64}")
}

/// Signs arbitrary claims with `key`, setting the given `typ` and the key's
/// kid in the header.
///
/// Produces correctly signed tokens with claims a manager would never
/// issue: future `iat`, foreign issuer, missing `nbf`.
///
/// # Panics
///
/// Panics if signing fails.
#[allow(clippy::expect_used)]
pub fn sign_claims(key: &KeyMetadata, token_type: TokenType, claims: &serde_json::Value) -> String {
    let mut header = Header::new(key.jwt_algorithm());
    header.typ = Some(token_type.typ().to_owned());
    header.kid = Some(key.kid().to_owned());
    encode(&header, claims, key.encoding_key()).expect("sign test claims")
}
