//! Persisted signing key record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Signature algorithm recorded for newly generated keys.
pub const DEFAULT_ALGORITHM: &str = "ES256";

/// Elliptic curve recorded for newly generated keys.
pub const DEFAULT_CURVE: &str = "P-256";

/// One row of the signing-key history held by the persistent store.
///
/// The private key is stored as ciphertext only; the plaintext PEM never
/// reaches the persistent store. The public key is stored as a plaintext
/// `PUBLIC KEY` PEM block.
///
/// # Lifecycle
///
/// ```text
/// ┌──────────┐  rotation   ┌─────────────┐  overflow / operator  ┌─────────┐
/// │  Active  │────────────►│ Rotated out │──────────────────────►│ Expired │
/// └──────────┘             └─────────────┘                       └─────────┘
///      │                                                              ▲
///      └──────────────────────────────────────────────────────────────┘
/// ```
///
/// - **Active**: signs new tokens. `rotated_out_at` and `expired_at` are unset.
/// - **Rotated out**: still verifies tokens, never signs. `rotated_out_at` set.
/// - **Expired**: dropped from the published key set. `expired_at` set.
///
/// # Example
///
/// ```
/// use keyward_storage::auth::SigningKeyRecord;
///
/// let record = SigningKeyRecord::builder()
///     .kid("a1b2c3d4")
///     .private_pem(b"ciphertext".to_vec())
///     .public_pem("-----BEGIN PUBLIC KEY-----\n...\n-----END PUBLIC KEY-----\n")
///     .build();
///
/// assert_eq!(record.alg, "ES256");
/// assert!(record.is_active());
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct SigningKeyRecord {
    /// Key ID, carried in the `kid` header of every token signed with it.
    #[builder(into)]
    pub kid: String,

    /// JWS algorithm name.
    #[builder(into, default = DEFAULT_ALGORITHM.to_owned())]
    pub alg: String,

    /// Curve name as published in the JWK `crv` member.
    #[builder(into, default = DEFAULT_CURVE.to_owned())]
    pub curve: String,

    /// Creation time. Records are ordered by this value, newest first.
    #[builder(default = Utc::now())]
    pub epoch: DateTime<Utc>,

    /// When the key stopped being the active signing key.
    pub rotated_out_at: Option<DateTime<Utc>>,

    /// When the key was retired from the published key set.
    pub expired_at: Option<DateTime<Utc>>,

    /// Encrypted PKCS#8 private key.
    ///
    /// Wrapped in [`Zeroizing`] so the ciphertext buffer is wiped on drop.
    #[builder(into)]
    pub private_pem: Zeroizing<Vec<u8>>,

    /// Plaintext `PUBLIC KEY` PEM block.
    #[builder(into)]
    pub public_pem: String,

    /// Whether the key was rotated out by an operator rather than retired
    /// by the system.
    #[serde(default)]
    #[builder(default)]
    pub manual_rotation: bool,

    /// Operator who rotated the key out, if it was a manual rotation.
    #[serde(default)]
    #[builder(into)]
    pub rotated_out_by: Option<String>,
}

impl SigningKeyRecord {
    /// Returns `true` if this key may sign new tokens.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.rotated_out_at.is_none() && self.expired_at.is_none()
    }

    /// Returns `true` if this key has not been retired from the key set.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.expired_at.is_none()
    }
}

impl std::fmt::Debug for SigningKeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyRecord")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .field("curve", &self.curve)
            .field("epoch", &self.epoch)
            .field("rotated_out_at", &self.rotated_out_at)
            .field("expired_at", &self.expired_at)
            .field("private_pem", &"[REDACTED]")
            .field("manual_rotation", &self.manual_rotation)
            .field("rotated_out_by", &self.rotated_out_by)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(kid: &str) -> SigningKeyRecord {
        SigningKeyRecord::builder()
            .kid(kid)
            .private_pem(b"sealed".to_vec())
            .public_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n")
            .build()
    }

    #[test]
    fn test_builder_defaults() {
        let key = record("k1");

        assert_eq!(key.alg, DEFAULT_ALGORITHM);
        assert_eq!(key.curve, DEFAULT_CURVE);
        assert!(key.rotated_out_at.is_none());
        assert!(key.expired_at.is_none());
        assert!(!key.manual_rotation);
        assert!(key.rotated_out_by.is_none());
    }

    #[test]
    fn test_state_predicates() {
        let active = record("k1");
        assert!(active.is_active());
        assert!(active.is_valid());

        let rotated = SigningKeyRecord { rotated_out_at: Some(Utc::now()), ..record("k2") };
        assert!(!rotated.is_active());
        assert!(rotated.is_valid());

        let expired = SigningKeyRecord { expired_at: Some(Utc::now()), ..record("k3") };
        assert!(!expired.is_active());
        assert!(!expired.is_valid());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let key = record("k1");
        let debug = format!("{key:?}");

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sealed"));
        assert!(!debug.contains("115, 101, 97"));
    }

    #[test]
    fn test_serde_roundtrip_and_unknown_fields_rejected() {
        let key = record("k1");
        let json = serde_json::to_string(&key).unwrap();
        let back: SigningKeyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);

        let mut value: serde_json::Value = serde_json::from_str(&json).unwrap();
        value["unexpected"] = serde_json::json!(true);
        assert!(serde_json::from_value::<SigningKeyRecord>(value).is_err());
    }

    #[test]
    fn test_manual_rotation_defaults_when_absent() {
        let key = record("k1");
        let mut value = serde_json::to_value(&key).unwrap();
        value.as_object_mut().unwrap().remove("manual_rotation");
        value.as_object_mut().unwrap().remove("rotated_out_by");

        let back: SigningKeyRecord = serde_json::from_value(value).unwrap();
        assert!(!back.manual_rotation);
        assert!(back.rotated_out_by.is_none());
    }
}
