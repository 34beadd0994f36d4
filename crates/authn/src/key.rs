//! Signing key pair values.
//!
//! [`KeyMetadata`] is immutable: a rotation produces a new value with
//! `rotated_at` set instead of mutating the one other tasks may be reading.

use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::{
    PublicKey, SecretKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding},
};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::{
    error::{AuthError, Result},
    jwks::Jwk,
    validation::{validate_algorithm, validate_kid},
};

const PUBLIC_KEY_PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";

/// One signing key pair and its provenance.
///
/// The private key is held in memory only to sign tokens. It is never
/// serialized, never included in `Debug` output, and zeroized on drop.
///
/// # Example
///
/// ```
/// use keyward_authn::KeyMetadata;
///
/// let key = KeyMetadata::generate("123")?;
/// assert_eq!(key.kid(), "123");
/// assert!(key.is_active());
///
/// let rotated = key.with_rotated_at(key.epoch() + chrono::Duration::seconds(1))?;
/// assert!(!rotated.is_active());
/// # Ok::<(), keyward_authn::AuthError>(())
/// ```
#[derive(Clone)]
pub struct KeyMetadata {
    kid: String,
    algorithm: String,
    public_pem: String,
    private_pem: Zeroizing<String>,
    epoch: DateTime<Utc>,
    rotated_at: Option<DateTime<Utc>>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

#[bon::bon]
impl KeyMetadata {
    /// Creates a key from PEM material, validating it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if:
    /// - The kid is malformed
    /// - The algorithm is not ES256
    /// - The public key is not a PEM `PUBLIC KEY` block on P-256
    /// - The private key is not PKCS#8 P-256 or does not match the public key
    /// - `rotated_at` is not strictly after `epoch`
    #[builder]
    pub fn new(
        #[builder(into)] kid: String,
        #[builder(into, default = "ES256".to_owned())] algorithm: String,
        #[builder(into)] public_pem: String,
        #[builder(with = |pem: impl Into<String>| Zeroizing::new(pem.into()))]
        private_pem: Zeroizing<String>,
        #[builder(default = Utc::now())] epoch: DateTime<Utc>,
        rotated_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        validate_kid(&kid).map_err(|e| AuthError::key_material(format!("invalid kid: {e}")))?;

        let algorithm = algorithm.to_ascii_uppercase();
        validate_algorithm(&algorithm)
            .map_err(|e| AuthError::key_material(format!("invalid key algorithm: {e}")))?;

        if !public_pem.trim_start().starts_with(PUBLIC_KEY_PEM_HEADER) {
            return Err(AuthError::key_material("public key must be a PEM PUBLIC KEY block"));
        }
        let public = PublicKey::from_public_key_pem(public_pem.trim())
            .map_err(|e| AuthError::key_material(format!("invalid P-256 public key: {e}")))?;
        let secret = SecretKey::from_pkcs8_pem(private_pem.trim())
            .map_err(|e| AuthError::key_material(format!("invalid P-256 private key: {e}")))?;
        if secret.public_key() != public {
            return Err(AuthError::key_material(format!(
                "private key does not match public key for kid {kid}"
            )));
        }

        if let Some(at) = rotated_at
            && at <= epoch
        {
            return Err(AuthError::key_material(format!(
                "rotated_at ({at}) must be after epoch ({epoch}) for kid {kid}"
            )));
        }

        let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes())
            .map_err(|e| AuthError::key_material(format!("unusable signing key: {e}")))?;
        let decoding_key = DecodingKey::from_ec_pem(public_pem.as_bytes())
            .map_err(|e| AuthError::key_material(format!("unusable verification key: {e}")))?;

        Ok(Self {
            kid,
            algorithm,
            public_pem,
            private_pem,
            epoch,
            rotated_at,
            encoding_key,
            decoding_key,
        })
    }
}

impl KeyMetadata {
    /// Generates a fresh P-256 key pair under `kid`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if the kid is malformed or PEM
    /// encoding fails.
    pub fn generate(kid: impl Into<String>) -> Result<Self> {
        let secret = SecretKey::random(&mut OsRng);
        let private_pem = secret
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| AuthError::key_material(format!("private key PEM encoding: {e}")))?;
        let public_pem = secret
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AuthError::key_material(format!("public key PEM encoding: {e}")))?;

        Self::builder()
            .kid(kid)
            .public_pem(public_pem)
            .private_pem(private_pem.as_str())
            .build()
    }

    /// Returns a copy with `rotated_at` set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if `at` is not after the epoch.
    pub fn with_rotated_at(&self, at: DateTime<Utc>) -> Result<Self> {
        if at <= self.epoch {
            return Err(AuthError::key_material(format!(
                "rotated_at ({at}) must be after epoch ({}) for kid {}",
                self.epoch, self.kid
            )));
        }
        Ok(Self { rotated_at: Some(at), ..self.clone() })
    }

    /// Key identifier.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Upper-case JWT algorithm name.
    #[must_use]
    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// Plaintext public key PEM.
    #[must_use]
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }

    /// Creation time.
    #[must_use]
    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Time the key stopped being the active signing key, if it has.
    #[must_use]
    pub fn rotated_at(&self) -> Option<DateTime<Utc>> {
        self.rotated_at
    }

    /// Returns `true` if the key has not been rotated out.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.rotated_at.is_none()
    }

    /// Public JWK for the key set document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if the public key cannot be parsed.
    pub fn jwk(&self) -> Result<Jwk> {
        Jwk::from_public_pem(&self.kid, &self.algorithm, &self.public_pem)
    }

    pub(crate) fn jwt_algorithm(&self) -> Algorithm {
        Algorithm::ES256
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    pub(crate) fn private_pem(&self) -> &str {
        &self.private_pem
    }
}

impl fmt::Debug for KeyMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMetadata")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("epoch", &self.epoch)
            .field("rotated_at", &self.rotated_at)
            .field("private_pem", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_produces_valid_pair() {
        let key = KeyMetadata::generate("abc").unwrap();

        assert_eq!(key.kid(), "abc");
        assert_eq!(key.algorithm(), "ES256");
        assert!(key.public_pem().starts_with(PUBLIC_KEY_PEM_HEADER));
        assert!(key.private_pem().contains("PRIVATE KEY"));
        assert!(key.is_active());
    }

    #[test]
    fn test_builder_normalizes_algorithm_case() {
        let source = KeyMetadata::generate("abc").unwrap();
        let key = KeyMetadata::builder()
            .kid("abc")
            .algorithm("es256")
            .public_pem(source.public_pem())
            .private_pem(source.private_pem())
            .build()
            .unwrap();

        assert_eq!(key.algorithm(), "ES256");
    }

    #[test]
    fn test_builder_rejects_non_public_pem() {
        let source = KeyMetadata::generate("abc").unwrap();
        let result = KeyMetadata::builder()
            .kid("abc")
            .public_pem(source.private_pem())
            .private_pem(source.private_pem())
            .build();

        assert!(matches!(result, Err(AuthError::KeyMaterial { ref message, .. }) if message.contains("PUBLIC KEY")));
    }

    #[test]
    fn test_builder_rejects_mismatched_pair() {
        let a = KeyMetadata::generate("a").unwrap();
        let b = KeyMetadata::generate("b").unwrap();
        let result = KeyMetadata::builder()
            .kid("a")
            .public_pem(a.public_pem())
            .private_pem(b.private_pem())
            .build();

        assert!(matches!(result, Err(AuthError::KeyMaterial { ref message, .. }) if message.contains("does not match")));
    }

    #[test]
    fn test_builder_rejects_unsupported_algorithm() {
        let source = KeyMetadata::generate("abc").unwrap();
        let result = KeyMetadata::builder()
            .kid("abc")
            .algorithm("HS256")
            .public_pem(source.public_pem())
            .private_pem(source.private_pem())
            .build();

        assert!(result.is_err());
    }

    #[test]
    fn test_rotated_at_must_follow_epoch() {
        let key = KeyMetadata::generate("abc").unwrap();

        assert!(key.with_rotated_at(key.epoch()).is_err());
        assert!(key.with_rotated_at(key.epoch() - chrono::Duration::seconds(5)).is_err());

        let rotated = key.with_rotated_at(key.epoch() + chrono::Duration::seconds(5)).unwrap();
        assert!(!rotated.is_active());
        // The original value is untouched.
        assert!(key.is_active());

        let result = KeyMetadata::builder()
            .kid("abc")
            .public_pem(key.public_pem())
            .private_pem(key.private_pem())
            .epoch(key.epoch())
            .rotated_at(key.epoch())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_private_key() {
        let key = KeyMetadata::generate("abc").unwrap();
        let debug = format!("{key:?}");

        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("PRIVATE KEY"));
    }
}
