//! Token service error types.
//!
//! This module defines errors that can occur while bootstrapping signing
//! keys, issuing and verifying tokens, and rotating keys.

use keyward_storage::{BoxError, StorageError};
use thiserror::Error;

/// Token lifecycle and key management errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`; new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Invalid configuration, detected at construction time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========== Bootstrap errors ==========
    /// The bootstrap master failed and raised the fleet-wide abort flag.
    #[error("Key bootstrap aborted by master")]
    BootstrapAborted,

    /// The follower waited longer than the configured timeout for the master.
    #[error("Key bootstrap timed out after {waited_secs}s waiting for master")]
    BootstrapTimeout {
        /// Whole seconds spent waiting.
        waited_secs: u64,
    },

    // ========== Token verification errors ==========
    /// The token's `kid` is not in the local key store.
    #[error("Signing key not recognized: {kid}")]
    KeyNotRecognized {
        /// Key ID taken from the token header.
        kid: String,
    },

    /// The refresh-token family failed an integrity check and was invalidated.
    #[error("Token integrity violation for family {fid}: {reason}")]
    TokenIntegrity {
        /// Family identifier.
        fid: String,
        /// What was detected.
        reason: String,
    },

    /// A first refresh-token issuance found a live family; it was invalidated.
    #[error("Token family already exists: {fid}")]
    FamilyExists {
        /// Family identifier.
        fid: String,
    },

    /// Malformed JWT - cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Token not yet valid (nbf claim in future).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Token issued in the future, beyond the allowed leeway.
    #[error("Token issued in the future")]
    InvalidIssuedAt,

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Unknown or invalid issuer.
    #[error("Invalid issuer: {0}")]
    InvalidIssuer(String),

    /// An access token was presented where a refresh token was expected, or
    /// the reverse.
    #[error("Invalid token type: expected {expected}, got {actual}")]
    InvalidTokenType {
        /// Expected `typ` header.
        expected: String,
        /// `typ` header found in the token.
        actual: String,
    },

    /// Required claim is missing.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    // ========== Store errors ==========
    /// The coordination store failed.
    ///
    /// Wraps the original [`StorageError`] to preserve the full error source
    /// chain for debugging and structured logging.
    #[error("Coordination store unavailable: {0}")]
    CoordinationStoreUnavailable(#[source] StorageError),

    /// The persistent signing-key store failed.
    #[error("Persistent store unavailable: {0}")]
    PersistentStoreUnavailable(#[source] StorageError),

    // ========== Key material errors ==========
    /// Key generation, PEM handling, or encryption failed.
    #[error("Key material error: {message}")]
    KeyMaterial {
        /// What went wrong.
        message: String,
        /// Underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// Key material file I/O failed.
    #[error("Key file error at {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// No active key is available to sign with.
    #[error("No active signing key")]
    NoActiveSigningKey,

    // ========== Rotation errors ==========
    /// Another rotation holds the rotation lock.
    #[error("Key rotation already in progress (held by {holder})")]
    RotationInProgress {
        /// Actor recorded in the lock, when readable.
        holder: String,
    },

    /// A rotation completed recently and the cooldown has not elapsed.
    #[error("Key rotation cooldown active")]
    RotationCooldown,
}

impl AuthError {
    /// Creates a key material error without a source.
    pub fn key_material(message: impl Into<String>) -> Self {
        Self::KeyMaterial { message: message.into(), source: None }
    }

    /// Creates a key material error wrapping `source`.
    pub fn key_material_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::KeyMaterial { message: message.into(), source: Some(std::sync::Arc::new(source)) }
    }

    /// Creates a key file error for `path`.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io { path: path.as_ref().display().to_string(), source }
    }

    /// Creates a token integrity error.
    pub fn integrity(fid: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TokenIntegrity { fid: fid.into(), reason: reason.into() }
    }

    /// Returns `true` if the error should be reported to the client as an
    /// authorization failure rather than a server error.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Self::KeyNotRecognized { .. }
                | Self::TokenIntegrity { .. }
                | Self::FamilyExists { .. }
                | Self::InvalidTokenFormat(_)
                | Self::TokenExpired
                | Self::TokenNotYetValid
                | Self::InvalidIssuedAt
                | Self::InvalidSignature
                | Self::InvalidIssuer(_)
                | Self::InvalidTokenType { .. }
                | Self::MissingClaim(_)
                | Self::UnsupportedAlgorithm(_)
        )
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => {
                AuthError::InvalidTokenFormat("Invalid JWT structure".into())
            },
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer("Issuer validation failed".into()),
            ErrorKind::InvalidAlgorithm => {
                AuthError::UnsupportedAlgorithm("Algorithm not supported".into())
            },
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                AuthError::key_material(format!("JWT key error: {}", err))
            },
            _ => AuthError::InvalidTokenFormat(format!("JWT error: {}", err)),
        }
    }
}

/// Result type alias for token service operations.
pub type Result<T> = std::result::Result<T, AuthError>;
