//! Token issuance, verification and refresh-token family tracking.
//!
//! [`TokenManager`] is an explicit per-process service: it holds the local
//! [`KeyStore`], the family ledger over the coordination store, and the
//! persistent key store used to validate announced keys. Construct one at
//! startup and share it behind an `Arc`.
//!
//! # Family state machine
//!
//! ```text
//!   NonExistent ──first issuance──► Active ──reissue (head matches)──► Active
//!        │                            │
//!        └──first issuance while ─────┼──reissue (head mismatch)──► Invalidated
//!           Active (FamilyExists)     └──invalidate_family─────────► Invalidated
//! ```
//!
//! Reissuance reads the ledger head, validates it, then writes the new head.
//! Two concurrent reissuances of the same token may both succeed; the next
//! use of the superseded token is then detected as a replay.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use jsonwebtoken::{Header, Validation, decode, encode};
use keyward_storage::{CoordinationStore, auth::SigningKeyRecordStore};

use crate::{
    config::TokenConfig,
    error::{AuthError, Result},
    family::{FamilyEntry, FamilyId, FamilyLedger},
    jwt::{DecodeOptions, TokenClaims, TokenType, decode_token_header, decode_unverified_claims},
    keystore::KeyStore,
    material::KeyCipher,
    validation::{validate_algorithm, validate_kid},
};

/// How a refresh token is being issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issuance {
    /// First token of a new family, after a successful login.
    First,
    /// Replacement for the presented refresh token, identified by its
    /// `jti` and `exp`.
    Reissue {
        /// `jti` of the presented token.
        prior_jti: String,
        /// `exp` of the presented token.
        prior_exp: u64,
    },
}

/// A freshly issued refresh/access pair.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// New refresh token; the family head.
    pub refresh_token: String,
    /// New access token.
    pub access_token: String,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("refresh_token", &"[REDACTED]")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// Outcome of [`TokenManager::accept_announced_key`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyIntake {
    /// The kid is already the signing key.
    AlreadyLatest,
    /// The key is active and is now the signing key.
    Promoted,
    /// The key was rotated out; it verifies tokens but does not sign.
    Added,
    /// The key is expired and was not added.
    Expired,
}

/// Issues, verifies, reissues and invalidates tokens.
pub struct TokenManager {
    config: TokenConfig,
    keys: Arc<KeyStore>,
    ledger: FamilyLedger,
    records: Arc<dyn SigningKeyRecordStore>,
    cipher: KeyCipher,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.config)
            .field("keys", &self.keys.kids())
            .field("latest", &self.keys.latest_kid())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl TokenManager {
    /// Creates a token manager.
    ///
    /// # Arguments
    ///
    /// * `config` - Lifetimes, leeway, issuer and caps
    /// * `keys` - Key store populated by [`KeyBootstrap`](crate::KeyBootstrap)
    /// * `coordination` - Store holding the family ledgers
    /// * `records` - Persistent key store, read when a new key is announced
    /// * `cipher` - Opens private keys of announced records
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the config is invalid.
    #[builder]
    pub fn new(
        config: TokenConfig,
        keys: Arc<KeyStore>,
        coordination: Arc<dyn CoordinationStore>,
        records: Arc<dyn SigningKeyRecordStore>,
        cipher: KeyCipher,
    ) -> Result<Self> {
        config.validate()?;
        let ledger =
            FamilyLedger::new(coordination, config.refresh_lifetime, config.max_tokens_per_family);
        Ok(Self { config, keys, ledger, records, cipher })
    }
}

impl TokenManager {
    /// Issues an access token signed with the latest key.
    ///
    /// Access tokens are not recorded in the family ledger.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoActiveSigningKey`] if no key is promoted, or
    /// [`AuthError::KeyMaterial`] if signing fails.
    pub fn issue_access_token(&self, subject: &str, session: i64, fid: &FamilyId) -> Result<String> {
        let now = unix_now();
        let claims = self.claims(subject, session, fid, now, self.config.access_lifetime, None);
        self.sign(&claims, TokenType::Access)
    }

    /// Issues a refresh token and records it as the family head.
    ///
    /// The token's `nbf` is `iat + access lifetime - leeway`, so it only
    /// becomes usable when its paired access token is about to expire.
    ///
    /// # Errors
    ///
    /// - [`AuthError::FamilyExists`] for a first issuance into a live family;
    ///   the family is invalidated
    /// - [`AuthError::TokenIntegrity`] for a reissuance whose prior token is
    ///   not the family head; the family is invalidated
    /// - [`AuthError::CoordinationStoreUnavailable`] if the ledger is unreachable
    #[tracing::instrument(skip(self, fid, issuance), fields(fid = %fid))]
    pub async fn issue_refresh_token(
        &self,
        subject: &str,
        session: i64,
        fid: &FamilyId,
        issuance: Issuance,
    ) -> Result<String> {
        match &issuance {
            Issuance::First => {
                if self.ledger.is_active(fid).await? {
                    tracing::warn!(fid = %fid, "first issuance into a live family");
                    self.invalidate_with_reason(fid, "family_exists").await?;
                    return Err(AuthError::FamilyExists { fid: fid.to_string() });
                }
            },
            Issuance::Reissue { prior_jti, prior_exp } => match self.ledger.head(fid).await {
                Ok(Some(head)) if head.jti == *prior_jti && head.exp == *prior_exp => {},
                Ok(Some(_)) => {
                    tracing::warn!(fid = %fid, jti = %prior_jti, "refresh token replay detected");
                    self.invalidate_with_reason(fid, "replay").await?;
                    return Err(AuthError::integrity(fid.as_str(), "refresh token is not the family head"));
                },
                Ok(None) => {
                    tracing::warn!(fid = %fid, "reissue against an empty family");
                    self.invalidate_with_reason(fid, "empty_family").await?;
                    return Err(AuthError::integrity(fid.as_str(), "family is invalid or expired"));
                },
                Err(err @ AuthError::TokenIntegrity { .. }) => {
                    self.invalidate_with_reason(fid, "malformed_ledger").await?;
                    return Err(err);
                },
                Err(err) => return Err(err),
            },
        }

        let now = unix_now();
        let nbf = now + self.config.access_lifetime.as_secs() - self.config.leeway.as_secs();
        let claims =
            self.claims(subject, session, fid, now, self.config.refresh_lifetime, Some(nbf));
        let token = self.sign(&claims, TokenType::Refresh)?;

        self.ledger.push(fid, &FamilyEntry::new(claims.jti.as_str(), claims.exp)).await?;
        tracing::debug!(fid = %fid, first = matches!(issuance, Issuance::First), "recorded refresh token");
        Ok(token)
    }

    /// Exchanges a refresh token for a new refresh/access pair.
    ///
    /// # Errors
    ///
    /// Any verification error of [`decode_token`](Self::decode_token), plus
    /// the errors of [`issue_refresh_token`](Self::issue_refresh_token).
    #[tracing::instrument(skip_all)]
    pub async fn reissue_token_pair(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims =
            self.decode_token(refresh_token, TokenType::Refresh, DecodeOptions::default()).await?;
        let fid = FamilyId::from_claim(claims.fid.as_str());

        let refresh_token = self
            .issue_refresh_token(
                &claims.sub,
                claims.sid,
                &fid,
                Issuance::Reissue { prior_jti: claims.jti, prior_exp: claims.exp },
            )
            .await?;
        let access_token = self.issue_access_token(&claims.sub, claims.sid, &fid)?;

        Ok(TokenPair { refresh_token, access_token })
    }

    /// Verifies a token and returns its claims.
    ///
    /// The header `kid` must be in the local key store and the `typ` must
    /// match `token_type`. Signature, `exp`, `nbf` and issuer are checked
    /// with the configured leeway; `iat` may not lie further in the future
    /// than the leeway.
    ///
    /// For refresh tokens, an `nbf`, `iat` or issuer failure on a correctly
    /// signed token invalidates its family and fails with
    /// [`AuthError::TokenIntegrity`].
    ///
    /// # Errors
    ///
    /// Returns an error classified by [`AuthError::is_unauthorized`] when the
    /// token is rejected, or a store error if invalidation fails.
    #[tracing::instrument(skip(self, token, options))]
    pub async fn decode_token(
        &self,
        token: &str,
        token_type: TokenType,
        options: DecodeOptions,
    ) -> Result<TokenClaims> {
        match self.verify(token, token_type, options) {
            Ok(claims) => Ok(claims),
            Err(err)
                if token_type == TokenType::Refresh
                    && matches!(
                        err,
                        AuthError::TokenNotYetValid
                            | AuthError::InvalidIssuedAt
                            | AuthError::InvalidIssuer(_)
                    ) =>
            {
                let claims = decode_unverified_claims(token)?;
                let fid = FamilyId::from_claim(claims.fid);
                tracing::warn!(fid = %fid, error = %err, "refresh token failed time or issuer checks");
                self.invalidate_with_reason(&fid, "compromised_refresh_token").await?;
                Err(AuthError::integrity(fid.as_str(), err.to_string()))
            },
            Err(err) => {
                tracing::debug!(error = %err, "token rejected");
                Err(err)
            },
        }
    }

    /// Deletes a family's ledger, revoking every refresh token in it.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CoordinationStoreUnavailable`] if the store fails.
    pub async fn invalidate_family(&self, fid: &FamilyId) -> Result<()> {
        self.invalidate_with_reason(fid, "explicit").await
    }

    /// Loads an announced key from the persistent store into the key store.
    ///
    /// An active record becomes the signing key. A rotated-out record is
    /// added for verification only. An expired record is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyNotRecognized`] if the persistent store has no
    /// such key, [`AuthError::PersistentStoreUnavailable`] if it fails, or
    /// [`AuthError::KeyMaterial`] if the record cannot be opened.
    #[tracing::instrument(skip(self))]
    pub async fn accept_announced_key(&self, kid: &str) -> Result<KeyIntake> {
        let previous = self.keys.latest();
        if previous.as_ref().is_some_and(|k| k.kid() == kid) {
            return Ok(KeyIntake::AlreadyLatest);
        }

        let record = self
            .records
            .get_key(kid)
            .await
            .map_err(AuthError::PersistentStoreUnavailable)?
            .ok_or_else(|| AuthError::KeyNotRecognized { kid: kid.to_owned() })?;

        if !record.is_valid() {
            tracing::info!(kid, "announced key is expired; ignoring");
            return Ok(KeyIntake::Expired);
        }

        let promote = record.is_active();
        let key = self.cipher.open_record(&record)?;
        self.keys.insert(key, promote);

        if !promote {
            tracing::info!(kid, "added rotated-out key for verification");
            return Ok(KeyIntake::Added);
        }

        if let Some(previous) = previous {
            self.refresh_rotation_state(previous.kid()).await;
        }
        tracing::info!(kid, "promoted announced key to latest");
        Ok(KeyIntake::Promoted)
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Access-token lifetime.
    #[must_use]
    pub fn access_lifetime(&self) -> Duration {
        self.config.access_lifetime
    }

    /// Refresh-token lifetime.
    #[must_use]
    pub fn refresh_lifetime(&self) -> Duration {
        self.config.refresh_lifetime
    }

    /// Clock-skew leeway.
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.config.leeway
    }

    /// The local key store.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// The family ledger.
    #[must_use]
    pub fn ledger(&self) -> &FamilyLedger {
        &self.ledger
    }

    /// Replaces the previous signing key's entry with the rotated-out copy
    /// from the persistent store. Best-effort: the key keeps verifying
    /// either way.
    async fn refresh_rotation_state(&self, kid: &str) {
        match self.records.get_key(kid).await {
            Ok(Some(record)) if record.rotated_out_at.is_some() => {
                match self.cipher.open_record(&record) {
                    Ok(rotated) => {
                        self.keys.insert(rotated, false);
                    },
                    Err(err) => tracing::warn!(kid, error = %err, "could not reload rotated key"),
                }
            },
            Ok(_) => {},
            Err(err) => tracing::warn!(kid, error = %err, "could not reload rotated key"),
        }
    }

    async fn invalidate_with_reason(&self, fid: &FamilyId, reason: &str) -> Result<()> {
        let existed = self.ledger.invalidate(fid).await?;
        let result = if existed { "success" } else { "absent" };
        tracing::info!(
            audit.action = "invalidate_family",
            audit.resource = %fid,
            audit.reason = reason,
            audit.result = result,
            "audit_event"
        );
        Ok(())
    }

    fn claims(
        &self,
        subject: &str,
        session: i64,
        fid: &FamilyId,
        now: u64,
        lifetime: Duration,
        nbf: Option<u64>,
    ) -> TokenClaims {
        TokenClaims {
            iss: self.config.issuer.clone(),
            sub: subject.to_owned(),
            sid: session,
            fid: fid.to_string(),
            jti: uuid::Uuid::new_v4().simple().to_string(),
            iat: now,
            exp: now + lifetime.as_secs(),
            nbf,
        }
    }

    fn sign(&self, claims: &TokenClaims, token_type: TokenType) -> Result<String> {
        let key = self.keys.latest().ok_or(AuthError::NoActiveSigningKey)?;

        let mut header = Header::new(key.jwt_algorithm());
        header.typ = Some(token_type.typ().to_owned());
        header.kid = Some(key.kid().to_owned());

        encode(&header, claims, key.encoding_key())
            .map_err(|e| AuthError::key_material(format!("token signing failed: {e}")))
    }

    fn verify(
        &self,
        token: &str,
        token_type: TokenType,
        options: DecodeOptions,
    ) -> Result<TokenClaims> {
        let header = decode_token_header(token)?;
        validate_algorithm(&format!("{:?}", header.alg))?;

        let kid = header.kid.ok_or_else(|| AuthError::MissingClaim("kid".into()))?;
        validate_kid(&kid)?;
        let key = self.keys.get(&kid).ok_or(AuthError::KeyNotRecognized { kid })?;

        let typ = header.typ.unwrap_or_default();
        if TokenType::from_typ(&typ) != Some(token_type) {
            return Err(AuthError::InvalidTokenType {
                expected: token_type.typ().to_owned(),
                actual: typ,
            });
        }

        let leeway = self.config.leeway.as_secs();
        let mut validation = Validation::new(key.jwt_algorithm());
        validation.leeway = leeway;
        validation.validate_exp = options.verify_exp;
        validation.validate_nbf = options.verify_nbf;
        validation.validate_aud = false;
        validation.set_issuer(&[self.config.issuer.as_str()]);
        let mut required = vec!["exp", "iss", "sub"];
        if token_type == TokenType::Refresh {
            required.push("nbf");
        }
        validation.set_required_spec_claims(&required);

        let claims = decode::<TokenClaims>(token, key.decoding_key(), &validation)?.claims;

        if claims.iat > unix_now() + leeway {
            return Err(AuthError::InvalidIssuedAt);
        }
        Ok(claims)
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}
