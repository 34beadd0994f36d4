//! Manual signing-key rotation.
//!
//! A rotation replaces the active signing key on one process and announces
//! the new kid; peers pick it up through their [`KeyPoller`](crate::KeyPoller).
//! Rotations are serialized fleet-wide by a lock in the coordination store
//! and rate limited by a cooldown flag.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use fail::fail_point;
use keyward_storage::{
    CoordinationStore,
    auth::{SigningKeyRecord, SigningKeyRecordStore},
};

use crate::{
    bootstrap::publish_key_set,
    config::RotationConfig,
    error::{AuthError, Result},
    key::KeyMetadata,
    manager::TokenManager,
    material::{KeyCipher, KeyFiles, KidGenerator, default_kid_generator},
};

/// Coordination key of the rotation lock. Its value names the holder.
pub const ROTATION_LOCK_KEY: &str = "auth:keys:rotation-lock";

/// Coordination key present while rotations are cooling down.
pub const ROTATION_COOLDOWN_KEY: &str = "auth:keys:rotation-cooldown";

/// Result of a completed rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    /// Kid of the key that was rotated out.
    pub previous_kid: String,
    /// Kid of the new signing key.
    pub new_kid: String,
    /// Kids expired to stay within the valid-key cap.
    pub expired: Vec<String>,
}

/// Rotates the signing key of a running fleet.
#[derive(bon::Builder)]
pub struct KeyRotator {
    coordination: Arc<dyn CoordinationStore>,
    records: Arc<dyn SigningKeyRecordStore>,
    cipher: KeyCipher,
    files: KeyFiles,
    manager: Arc<TokenManager>,
    #[builder(default)]
    config: RotationConfig,
    #[builder(default = default_kid_generator())]
    kid_generator: KidGenerator,
}

impl fmt::Debug for KeyRotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRotator").field("config", &self.config).finish_non_exhaustive()
    }
}

impl KeyRotator {
    /// Generates a new signing key and rotates the current one out.
    ///
    /// `actor` identifies who requested the rotation; it is stored as the
    /// lock holder, recorded on the rotated-out key and in the audit event.
    ///
    /// A failure before the persistent store commits leaves every store
    /// untouched. A failure while publishing the new key set rolls the
    /// commit back, so peers, the persistent store and this process keep
    /// agreeing on the signing key.
    ///
    /// # Errors
    ///
    /// - [`AuthError::RotationInProgress`] if another rotation holds the lock
    /// - [`AuthError::RotationCooldown`] if the previous rotation is too recent
    /// - [`AuthError::NoActiveSigningKey`] if the persistent store has no
    ///   active key to rotate out
    /// - store, key material and file errors
    #[tracing::instrument(skip(self))]
    pub async fn rotate(&self, actor: &str) -> Result<RotationOutcome> {
        let acquired = self
            .coordination
            .set_if_absent(ROTATION_LOCK_KEY, actor, Some(self.config.lock_ttl))
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;
        if !acquired {
            let holder = self
                .coordination
                .get(ROTATION_LOCK_KEY)
                .await
                .map_err(AuthError::CoordinationStoreUnavailable)?
                .unwrap_or_default();
            return Err(AuthError::RotationInProgress { holder });
        }

        let result = self.rotate_locked(actor).await;

        if let Err(err) = self.coordination.delete(ROTATION_LOCK_KEY).await {
            tracing::warn!(error = %err, "failed to release rotation lock");
        }

        let outcome = match &result {
            Ok(rotation) => {
                tracing::info!(
                    previous = %rotation.previous_kid,
                    new = %rotation.new_kid,
                    expired = ?rotation.expired,
                    "signing key rotation complete"
                );
                "success"
            },
            Err(AuthError::RotationCooldown) => "cooldown",
            Err(_) => "failure",
        };
        tracing::info!(
            audit.action = "rotate_signing_key",
            audit.actor = actor,
            audit.result = outcome,
            "audit_event"
        );
        result
    }

    async fn rotate_locked(&self, actor: &str) -> Result<RotationOutcome> {
        let cooling_down = self
            .coordination
            .exists(ROTATION_COOLDOWN_KEY)
            .await
            .map_err(AuthError::CoordinationStoreUnavailable)?;
        if cooling_down {
            return Err(AuthError::RotationCooldown);
        }

        let current = self
            .records
            .list_valid_keys(usize::MAX)
            .await
            .map_err(AuthError::PersistentStoreUnavailable)?
            .into_iter()
            .find(|record| record.is_active())
            .ok_or(AuthError::NoActiveSigningKey)?;

        let new_key = KeyMetadata::generate((self.kid_generator)())?;
        let new_record = self.cipher.seal_record(&new_key)?;
        let new_kid = new_record.kid.clone();

        // Nothing is committed until the new key's files are on disk.
        if let Err(err) = self.files.write_key(&new_record).await {
            self.discard_files(&new_kid).await;
            return Err(err);
        }

        let now = Utc::now();
        if let Err(err) = self.records.rotate_key(&current.kid, &new_record, now, actor).await {
            self.discard_files(&new_kid).await;
            return Err(AuthError::PersistentStoreUnavailable(err));
        }

        let keys = self.manager.keys();
        let saved = keys.snapshot();
        if let Err(err) = self.promote_and_publish(&current, new_key, now).await {
            tracing::warn!(error = %err, kid = %new_kid, "rotation failed after commit; rolling back");
            keys.restore(saved);
            self.roll_back(&current.kid, &new_kid).await;
            return Err(err);
        }

        if let Err(err) = self
            .coordination
            .set_with_ttl(ROTATION_COOLDOWN_KEY, &new_kid, self.config.cooldown)
            .await
        {
            tracing::warn!(error = %err, "failed to set rotation cooldown");
        }

        let expired = self.expire_excess(now).await;
        if let Err(err) = self.files.remove_private(&current.kid).await {
            tracing::warn!(kid = %current.kid, error = %err, "failed to remove rotated-out private key file");
        }

        Ok(RotationOutcome { previous_kid: current.kid, new_kid, expired })
    }

    /// Swaps the local signing key and publishes the new key set.
    async fn promote_and_publish(
        &self,
        current: &SigningKeyRecord,
        new_key: KeyMetadata,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let keys = self.manager.keys();
        let previous = match keys.get(&current.kid) {
            Some(key) => key.with_rotated_at(now)?,
            None => self.cipher.open_record(current)?.with_rotated_at(now)?,
        };
        keys.insert(previous, false);
        keys.insert(new_key, true);

        fail_point!("rotation-before-publish", |_| {
            Err(AuthError::key_material("injected failure before publishing rotated keys"))
        });

        publish_key_set(&*self.coordination, &self.files, keys).await
    }

    /// Undoes a committed rotation: the new record is deleted and the
    /// previous key is active again.
    async fn roll_back(&self, previous_kid: &str, new_kid: &str) {
        if let Err(err) = self.records.delete_key(new_kid).await {
            tracing::error!(kid = new_kid, error = %err, "failed to delete record of rolled-back key");
        }
        if let Err(err) = self.records.reinstate_key(previous_kid).await {
            tracing::error!(kid = previous_kid, error = %err, "failed to reinstate previous signing key");
        }
        self.discard_files(new_kid).await;
    }

    async fn discard_files(&self, kid: &str) {
        if let Err(err) = self.files.purge(kid).await {
            tracing::warn!(kid, error = %err, "failed to remove key files of abandoned key");
        }
    }

    /// Retires keys beyond the valid-key cap. The new key set is already
    /// announced, so failures are logged and left for the next bootstrap.
    async fn expire_excess(&self, now: DateTime<Utc>) -> Vec<String> {
        let max_valid_keys = self.manager.config().max_valid_keys();
        let valid = match self.records.list_valid_keys(usize::MAX).await {
            Ok(valid) => valid,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list keys for expiry");
                return Vec::new();
            },
        };

        let mut expired = Vec::new();
        for record in valid.into_iter().skip(max_valid_keys) {
            if let Err(err) = self.records.mark_expired(&record.kid, now).await {
                tracing::warn!(kid = %record.kid, error = %err, "failed to expire excess signing key");
                continue;
            }
            if let Err(err) = self.files.purge(&record.kid).await {
                tracing::warn!(kid = %record.kid, error = %err, "failed to purge expired key files");
            }
            expired.push(record.kid);
        }
        expired
    }
}
