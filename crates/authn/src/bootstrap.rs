//! Startup election and key discovery.
//!
//! Every process runs [`KeyBootstrap::run`] once before serving. Exactly one
//! process wins the `auth:bootstrap:master` flag and becomes master: it
//! discovers or creates signing keys, heals key files, and publishes the
//! public key set. The others wait for the master to release the flag and
//! then load the same keys from the persistent store.
//!
//! ```text
//!   set_if_absent(master) ──won──► Master: discover ─► heal ─► publish ─► release
//!            │                               │
//!            │                               └─error──► set abort ─► release
//!            └──lost──► Follower: wait for release ─► load top-N keys
//!                               └──abort seen──► BootstrapAborted
//! ```

use std::{fmt, sync::Arc, time::Instant};

use chrono::Utc;
use fail::fail_point;
use keyward_storage::{
    CoordinationStore,
    auth::{SigningKeyRecord, SigningKeyRecordStore},
};

use crate::{
    config::BootstrapConfig,
    error::{AuthError, Result},
    jwks::Jwks,
    key::KeyMetadata,
    keystore::KeyStore,
    material::{KeyCipher, KeyFiles, KidGenerator, default_kid_generator},
};

/// Coordination key of the bootstrap master flag.
pub const MASTER_FLAG_KEY: &str = "auth:bootstrap:master";

/// Coordination key of the fleet-wide abort flag.
pub const ABORT_FLAG_KEY: &str = "auth:bootstrap:abort";

/// Coordination hash of `kid → public PEM` for every retained key.
pub const PUBLIC_KEYS_KEY: &str = "auth:keys:public";

/// Coordination key naming the current signing kid.
pub const ANNOUNCE_KEY: &str = "auth:keys:announce";

/// Role a process took during bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapRole {
    /// Won the election and prepared the key set.
    Master,
    /// Loaded the key set prepared by the master.
    Follower,
}

impl fmt::Display for BootstrapRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Follower => f.write_str("follower"),
        }
    }
}

/// Result of a successful bootstrap.
#[derive(Debug)]
pub struct BootstrapOutcome {
    /// Role this process took.
    pub role: BootstrapRole,
    /// Populated key store with the active key promoted.
    pub keys: Arc<KeyStore>,
}

/// Master/follower key bootstrap.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use keyward_authn::{KeyBootstrap, KeyCipher, KeyFiles, KeyFilesConfig};
/// use keyward_storage::{MemoryCoordinationStore, auth::MemorySigningKeyRecordStore};
///
/// # async fn example(files_config: KeyFilesConfig) -> Result<(), Box<dyn std::error::Error>> {
/// let bootstrap = KeyBootstrap::builder()
///     .coordination(Arc::new(MemoryCoordinationStore::new()))
///     .records(Arc::new(MemorySigningKeyRecordStore::new()))
///     .cipher(KeyCipher::from_config(&files_config)?)
///     .files(KeyFiles::new(files_config))
///     .max_valid_keys(3)
///     .build();
///
/// let outcome = bootstrap.run().await?;
/// println!("bootstrapped as {}", outcome.role);
/// # Ok(())
/// # }
/// ```
#[derive(bon::Builder)]
pub struct KeyBootstrap {
    coordination: Arc<dyn CoordinationStore>,
    records: Arc<dyn SigningKeyRecordStore>,
    cipher: KeyCipher,
    files: KeyFiles,
    max_valid_keys: usize,
    #[builder(default)]
    config: BootstrapConfig,
    #[builder(default = default_kid_generator())]
    kid_generator: KidGenerator,
    /// Value written into the master flag, identifying this process.
    #[builder(into, default = uuid::Uuid::new_v4().to_string())]
    instance_id: String,
}

impl fmt::Debug for KeyBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyBootstrap")
            .field("instance_id", &self.instance_id)
            .field("max_valid_keys", &self.max_valid_keys)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KeyBootstrap {
    /// Runs the election and returns the populated key store.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the process:
    /// - [`AuthError::BootstrapAborted`] if the master failed
    /// - [`AuthError::BootstrapTimeout`] if the master did not finish in time
    /// - [`AuthError::Configuration`] if the retained keys contain no active
    ///   key
    /// - store, key material and file errors from the master steps
    #[tracing::instrument(skip(self), fields(instance = %self.instance_id))]
    pub async fn run(&self) -> Result<BootstrapOutcome> {
        self.config.validate()?;

        let elected = self
            .coordination
            .set_if_absent(MASTER_FLAG_KEY, &self.instance_id, Some(self.config.master_flag_ttl))
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;

        let outcome = if elected {
            tracing::info!(role = %BootstrapRole::Master, "elected bootstrap master");
            self.run_master().await?
        } else {
            tracing::info!(role = %BootstrapRole::Follower, "waiting for bootstrap master");
            self.run_follower().await?
        };

        tracing::info!(
            role = %outcome.role,
            latest = ?outcome.keys.latest_kid(),
            keys = outcome.keys.len(),
            "key bootstrap complete"
        );
        Ok(outcome)
    }

    async fn run_master(&self) -> Result<BootstrapOutcome> {
        let result = self.discover().await;

        if let Err(err) = &result {
            tracing::error!(error = %err, "bootstrap master failed; raising abort flag");
            if let Err(flag_err) = self
                .coordination
                .set_with_ttl(ABORT_FLAG_KEY, &self.instance_id, self.config.abort_flag_ttl)
                .await
            {
                tracing::error!(error = %flag_err, "failed to raise bootstrap abort flag");
            }
        }

        if let Err(err) = self.coordination.delete(MASTER_FLAG_KEY).await {
            tracing::warn!(error = %err, "failed to release bootstrap master flag");
        }

        result.map(|keys| BootstrapOutcome { role: BootstrapRole::Master, keys: Arc::new(keys) })
    }

    async fn discover(&self) -> Result<KeyStore> {
        self.coordination
            .delete(ABORT_FLAG_KEY)
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;

        fail_point!("bootstrap-before-discovery", |_| {
            Err(AuthError::key_material("injected failure before key discovery"))
        });

        let mut valid = self
            .records
            .list_valid_keys(usize::MAX)
            .await
            .map_err(AuthError::PersistentStoreUnavailable)?;

        if valid.is_empty() {
            let key = KeyMetadata::generate((self.kid_generator)())?;
            let record = self.cipher.seal_record(&key)?;
            self.records.insert_key(&record).await.map_err(AuthError::PersistentStoreUnavailable)?;
            self.files.write_key(&record).await?;
            tracing::info!(kid = %record.kid, "generated initial signing key");
            valid.push(record);
        } else if valid.len() > self.max_valid_keys {
            let now = Utc::now();
            for record in valid.drain(self.max_valid_keys..) {
                self.records
                    .mark_expired(&record.kid, now)
                    .await
                    .map_err(AuthError::PersistentStoreUnavailable)?;
                tracing::info!(kid = %record.kid, "expired excess signing key");
            }
        }

        for record in &valid {
            self.files.ensure_public(record).await?;
            if record.is_active() {
                self.files.ensure_private(record).await?;
            } else if self.files.remove_private(&record.kid).await? {
                tracing::info!(kid = %record.kid, "removed private key file of rotated-out key");
            }
        }

        let expired = self.records.list_expired_kids().await.map_err(AuthError::PersistentStoreUnavailable)?;
        for kid in &expired {
            self.files.purge(kid).await?;
        }

        let keys = load_key_store(&self.cipher, &valid, self.max_valid_keys)?;

        fail_point!("bootstrap-before-publish", |_| {
            Err(AuthError::key_material("injected failure before publishing keys"))
        });

        publish_key_set(&*self.coordination, &self.files, &keys).await?;
        Ok(keys)
    }

    async fn run_follower(&self) -> Result<BootstrapOutcome> {
        let started = Instant::now();

        loop {
            let master = self
                .coordination
                .get(MASTER_FLAG_KEY)
                .await
                .map_err(AuthError::CoordinationStoreUnavailable)?;
            let Some(master) = master else {
                break;
            };
            // An abort left by an earlier boot stays until the new master
            // clears it; only the current master's abort counts.
            if self.abort_holder().await?.as_deref() == Some(master.as_str()) {
                return Err(AuthError::BootstrapAborted);
            }
            if let Some(timeout) = self.config.follower_timeout
                && started.elapsed() >= timeout
            {
                return Err(AuthError::BootstrapTimeout { waited_secs: started.elapsed().as_secs() });
            }
            tokio::time::sleep(self.config.follower_poll_interval).await;
        }

        // The master raises the abort flag before releasing its own, and a
        // master that got this far cleared any older one.
        if self.abort_holder().await?.is_some() {
            return Err(AuthError::BootstrapAborted);
        }

        let valid = self
            .records
            .list_valid_keys(self.max_valid_keys)
            .await
            .map_err(AuthError::PersistentStoreUnavailable)?;
        let keys = load_key_store(&self.cipher, &valid, self.max_valid_keys)?;

        Ok(BootstrapOutcome { role: BootstrapRole::Follower, keys: Arc::new(keys) })
    }

    /// Instance id of the master that raised the abort flag, if raised.
    async fn abort_holder(&self) -> Result<Option<String>> {
        self.coordination.get(ABORT_FLAG_KEY).await.map_err(AuthError::CoordinationStoreUnavailable)
    }
}

/// Builds a key store from records ordered newest first, promoting the
/// newest active key.
pub(crate) fn load_key_store(
    cipher: &KeyCipher,
    newest_first: &[SigningKeyRecord],
    capacity: usize,
) -> Result<KeyStore> {
    let store = KeyStore::new(capacity);
    for record in newest_first.iter().take(capacity).rev() {
        let key = cipher.open_record(record)?;
        store.insert(key, record.is_active());
    }

    if store.latest().is_none() {
        return Err(AuthError::Configuration(format!(
            "none of the {} retained signing keys is active",
            newest_first.len().min(capacity)
        )));
    }
    Ok(store)
}

/// Writes the public key set document and republishes the public-key hash
/// and the signing-kid announcement.
pub(crate) async fn publish_key_set(
    coordination: &dyn CoordinationStore,
    files: &KeyFiles,
    keys: &KeyStore,
) -> Result<()> {
    let snapshot = keys.snapshot();
    let latest = snapshot.latest().ok_or(AuthError::NoActiveSigningKey)?;

    let jwks = Jwks::from_keys(snapshot.iter().map(|k| &**k), keys.capacity())?;
    files.write_jwks(&jwks).await?;

    // New fields land before stale ones go, so readers never see an empty set.
    for key in snapshot.iter() {
        coordination
            .hash_set(PUBLIC_KEYS_KEY, key.kid(), key.public_pem())
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;
    }
    let published =
        coordination.hash_get_all(PUBLIC_KEYS_KEY).await.map_err(AuthError::CoordinationStoreUnavailable)?;
    for kid in published.keys().filter(|kid| snapshot.get(kid).is_none()) {
        let _removed = coordination
            .hash_delete(PUBLIC_KEYS_KEY, kid)
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;
    }
    coordination
        .set(ANNOUNCE_KEY, latest.kid())
        .await
        .map_err(AuthError::CoordinationStoreUnavailable)?;

    tracing::debug!(kids = ?jwks.kids(), latest = latest.kid(), "published key set");
    Ok(())
}
