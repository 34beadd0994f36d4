//! Configuration for token issuance, key bootstrap, rotation and key files.
//!
//! Every config type deserializes with `serde` (durations in `humantime`
//! form such as `"30m"`) and is also constructible through a validating
//! builder. Invalid values are rejected with [`AuthError::Configuration`].

use std::{fmt, path::PathBuf, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{AuthError, Result};

/// Default access-token lifetime (30 minutes).
pub const DEFAULT_ACCESS_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Default refresh-token lifetime (3 hours).
pub const DEFAULT_REFRESH_LIFETIME: Duration = Duration::from_secs(3 * 60 * 60);

/// Default clock-skew leeway applied to `exp`, `nbf` and `iat` (180 seconds).
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(180);

/// Default number of `(jti, exp)` entries kept per refresh-token family.
pub const DEFAULT_MAX_TOKENS_PER_FAMILY: usize = 3;

/// Default number of non-expired signing keys kept.
pub const DEFAULT_MAX_VALID_KEYS: usize = 3;

/// Default key announcement poll interval (10 seconds).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Default token issuer.
pub const DEFAULT_ISSUER: &str = "keyward-auth-service";

const DEFAULT_MASTER_FLAG_TTL: Duration = Duration::from_secs(300);
const DEFAULT_ABORT_FLAG_TTL: Duration = Duration::from_secs(120);
const DEFAULT_FOLLOWER_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_FOLLOWER_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_ROTATION_LOCK_TTL: Duration = Duration::from_secs(300);
const DEFAULT_ROTATION_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Length in bytes of the private-key encryption key.
pub const ENCRYPTION_KEY_LEN: usize = 32;

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_owned()
}

fn default_access_lifetime() -> Duration {
    DEFAULT_ACCESS_LIFETIME
}

fn default_refresh_lifetime() -> Duration {
    DEFAULT_REFRESH_LIFETIME
}

fn default_leeway() -> Duration {
    DEFAULT_LEEWAY
}

fn default_max_tokens_per_family() -> usize {
    DEFAULT_MAX_TOKENS_PER_FAMILY
}

fn default_max_valid_keys() -> usize {
    DEFAULT_MAX_VALID_KEYS
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_master_flag_ttl() -> Duration {
    DEFAULT_MASTER_FLAG_TTL
}

fn default_abort_flag_ttl() -> Duration {
    DEFAULT_ABORT_FLAG_TTL
}

fn default_follower_poll_interval() -> Duration {
    DEFAULT_FOLLOWER_POLL_INTERVAL
}

fn default_follower_timeout() -> Option<Duration> {
    Some(DEFAULT_FOLLOWER_TIMEOUT)
}

fn default_rotation_lock_ttl() -> Duration {
    DEFAULT_ROTATION_LOCK_TTL
}

fn default_rotation_cooldown() -> Duration {
    DEFAULT_ROTATION_COOLDOWN
}

fn config_error(message: impl Into<String>) -> AuthError {
    AuthError::Configuration(message.into())
}

/// Token lifetimes, leeway, issuer and family/key caps.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use keyward_authn::TokenConfig;
///
/// let config = TokenConfig::builder()
///     .access_lifetime(Duration::from_secs(15 * 60))
///     .refresh_lifetime(Duration::from_secs(24 * 60 * 60))
///     .build()?;
/// assert_eq!(config.issuer(), "keyward-auth-service");
/// # Ok::<(), keyward_authn::AuthError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenConfig {
    /// Value of the `iss` claim on issued tokens; required on verification.
    #[serde(default = "default_issuer")]
    pub(crate) issuer: String,

    /// Access-token lifetime.
    #[serde(with = "humantime_serde", default = "default_access_lifetime")]
    pub(crate) access_lifetime: Duration,

    /// Refresh-token lifetime, also the TTL of family ledgers.
    #[serde(with = "humantime_serde", default = "default_refresh_lifetime")]
    pub(crate) refresh_lifetime: Duration,

    /// Clock-skew leeway.
    #[serde(with = "humantime_serde", default = "default_leeway")]
    pub(crate) leeway: Duration,

    /// Entries kept per family ledger.
    #[serde(default = "default_max_tokens_per_family")]
    pub(crate) max_tokens_per_family: usize,

    /// Non-expired signing keys kept, in the key store and the JWKS.
    #[serde(default = "default_max_valid_keys")]
    pub(crate) max_valid_keys: usize,

    /// Interval of the key announcement poller.
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub(crate) poll_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            access_lifetime: DEFAULT_ACCESS_LIFETIME,
            refresh_lifetime: DEFAULT_REFRESH_LIFETIME,
            leeway: DEFAULT_LEEWAY,
            max_tokens_per_family: DEFAULT_MAX_TOKENS_PER_FAMILY,
            max_valid_keys: DEFAULT_MAX_VALID_KEYS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[bon::bon]
impl TokenConfig {
    /// Creates a new token configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if:
    /// - The issuer is empty
    /// - The refresh lifetime is not longer than the access lifetime
    /// - The leeway is not shorter than the access lifetime
    /// - A cap or the poll interval is zero
    #[builder]
    pub fn new(
        #[builder(into, default = default_issuer())] issuer: String,
        #[builder(default = DEFAULT_ACCESS_LIFETIME)] access_lifetime: Duration,
        #[builder(default = DEFAULT_REFRESH_LIFETIME)] refresh_lifetime: Duration,
        #[builder(default = DEFAULT_LEEWAY)] leeway: Duration,
        #[builder(default = DEFAULT_MAX_TOKENS_PER_FAMILY)] max_tokens_per_family: usize,
        #[builder(default = DEFAULT_MAX_VALID_KEYS)] max_valid_keys: usize,
        #[builder(default = DEFAULT_POLL_INTERVAL)] poll_interval: Duration,
    ) -> Result<Self> {
        let config = Self {
            issuer,
            access_lifetime,
            refresh_lifetime,
            leeway,
            max_tokens_per_family,
            max_valid_keys,
            poll_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants enforced by the builder.
    ///
    /// Deserialized configs bypass the builder; call this after loading one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(config_error("issuer cannot be empty"));
        }
        if self.access_lifetime.is_zero() {
            return Err(config_error("access_lifetime must be positive"));
        }
        if self.refresh_lifetime <= self.access_lifetime {
            return Err(config_error("refresh_lifetime must be longer than access_lifetime"));
        }
        if self.leeway >= self.access_lifetime {
            return Err(config_error("leeway must be shorter than access_lifetime"));
        }
        if self.max_tokens_per_family == 0 {
            return Err(config_error("max_tokens_per_family must be at least 1"));
        }
        if self.max_valid_keys == 0 {
            return Err(config_error("max_valid_keys must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(config_error("poll_interval must be positive"));
        }
        Ok(())
    }

    /// Returns the token issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the access-token lifetime.
    #[must_use]
    pub fn access_lifetime(&self) -> Duration {
        self.access_lifetime
    }

    /// Returns the refresh-token lifetime.
    #[must_use]
    pub fn refresh_lifetime(&self) -> Duration {
        self.refresh_lifetime
    }

    /// Returns the clock-skew leeway.
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Returns the family ledger cap.
    #[must_use]
    pub fn max_tokens_per_family(&self) -> usize {
        self.max_tokens_per_family
    }

    /// Returns the valid signing-key cap.
    #[must_use]
    pub fn max_valid_keys(&self) -> usize {
        self.max_valid_keys
    }

    /// Returns the key announcement poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Timing of the master/follower bootstrap election.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    /// TTL of the master flag, bounding how long a crashed master blocks peers.
    #[serde(with = "humantime_serde", default = "default_master_flag_ttl")]
    #[builder(default = default_master_flag_ttl())]
    pub master_flag_ttl: Duration,

    /// TTL of the abort flag raised by a failed master.
    #[serde(with = "humantime_serde", default = "default_abort_flag_ttl")]
    #[builder(default = default_abort_flag_ttl())]
    pub abort_flag_ttl: Duration,

    /// Sleep between follower checks of the master flag.
    #[serde(with = "humantime_serde", default = "default_follower_poll_interval")]
    #[builder(default = default_follower_poll_interval())]
    pub follower_poll_interval: Duration,

    /// Upper bound on the follower wait. `None` waits indefinitely.
    ///
    /// Set through [`BootstrapConfig::with_follower_timeout`] when building.
    #[serde(with = "humantime_serde", default = "default_follower_timeout")]
    #[builder(skip = default_follower_timeout())]
    pub follower_timeout: Option<Duration>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            master_flag_ttl: default_master_flag_ttl(),
            abort_flag_ttl: default_abort_flag_ttl(),
            follower_poll_interval: default_follower_poll_interval(),
            follower_timeout: default_follower_timeout(),
        }
    }
}

impl BootstrapConfig {
    /// Replaces the follower wait bound; `None` waits indefinitely.
    #[must_use]
    pub fn with_follower_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.follower_timeout = timeout;
        self
    }

    /// Checks that every interval is positive.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.master_flag_ttl.is_zero() || self.abort_flag_ttl.is_zero() {
            return Err(config_error("bootstrap flag TTLs must be positive"));
        }
        if self.follower_poll_interval.is_zero() {
            return Err(config_error("follower_poll_interval must be positive"));
        }
        if self.follower_timeout.is_some_and(|t| t.is_zero()) {
            return Err(config_error("follower_timeout must be positive when set"));
        }
        Ok(())
    }
}

/// Guards around manual key rotation.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RotationConfig {
    /// TTL of the rotation lock.
    #[serde(with = "humantime_serde", default = "default_rotation_lock_ttl")]
    #[builder(default = default_rotation_lock_ttl())]
    pub lock_ttl: Duration,

    /// Minimum time between two rotations.
    #[serde(with = "humantime_serde", default = "default_rotation_cooldown")]
    #[builder(default = default_rotation_cooldown())]
    pub cooldown: Duration,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { lock_ttl: default_rotation_lock_ttl(), cooldown: default_rotation_cooldown() }
    }
}

/// Locations of key material on disk and the private-key encryption key.
///
/// The encryption key is 32 bytes, given as unpadded base64url. It is
/// zeroized on drop and redacted from `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyFilesConfig {
    /// Public key set document, rewritten atomically.
    pub(crate) jwks_path: PathBuf,

    /// Directory of encrypted private-key files.
    pub(crate) private_dir: PathBuf,

    /// Directory of plaintext public-key files.
    pub(crate) public_dir: PathBuf,

    /// Base64url ChaCha20-Poly1305 key.
    pub(crate) encryption_key: Zeroizing<String>,
}

impl fmt::Debug for KeyFilesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFilesConfig")
            .field("jwks_path", &self.jwks_path)
            .field("private_dir", &self.private_dir)
            .field("public_dir", &self.public_dir)
            .field("encryption_key", &"[REDACTED]")
            .finish()
    }
}

#[bon::bon]
impl KeyFilesConfig {
    /// Creates a new key files configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the encryption key does not
    /// decode to exactly 32 bytes.
    #[builder]
    pub fn new(
        #[builder(into)] jwks_path: PathBuf,
        #[builder(into)] private_dir: PathBuf,
        #[builder(into)] public_dir: PathBuf,
        #[builder(with = |key: impl Into<String>| Zeroizing::new(key.into()))]
        encryption_key: Zeroizing<String>,
    ) -> Result<Self> {
        let config = Self { jwks_path, private_dir, public_dir, encryption_key };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the encryption key is well-formed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if it is not 32 bytes of base64url.
    pub fn validate(&self) -> Result<()> {
        self.encryption_key_bytes().map(|_| ())
    }

    /// Returns the public key set document path.
    #[must_use]
    pub fn jwks_path(&self) -> &std::path::Path {
        &self.jwks_path
    }

    /// Returns the private-key directory.
    #[must_use]
    pub fn private_dir(&self) -> &std::path::Path {
        &self.private_dir
    }

    /// Returns the public-key directory.
    #[must_use]
    pub fn public_dir(&self) -> &std::path::Path {
        &self.public_dir
    }

    pub(crate) fn encryption_key_bytes(&self) -> Result<Zeroizing<[u8; ENCRYPTION_KEY_LEN]>> {
        let decoded = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(self.encryption_key.trim_end_matches('=').as_bytes())
                .map_err(|_| config_error("encryption_key is not valid base64url"))?,
        );
        let mut key = Zeroizing::new([0u8; ENCRYPTION_KEY_LEN]);
        if decoded.len() != ENCRYPTION_KEY_LEN {
            return Err(config_error(format!(
                "encryption_key must decode to {ENCRYPTION_KEY_LEN} bytes, got {}",
                decoded.len()
            )));
        }
        key.copy_from_slice(&decoded);
        Ok(key)
    }
}
