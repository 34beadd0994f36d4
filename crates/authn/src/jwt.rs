//! JWT claims, token types and header handling.
//!
//! # Example
//!
//! ```no_run
//! // Requires a token string issued by a `TokenManager`.
//! use keyward_authn::jwt::{decode_token_header, decode_unverified_claims};
//!
//! # fn example(token: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let header = decode_token_header(token)?;
//! let claims = decode_unverified_claims(token)?;
//!
//! println!("kid: {:?}, family: {}", header.kid, claims.fid);
//! # Ok(())
//! # }
//! ```

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Header, decode_header};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Claims carried by access and refresh tokens.
///
/// ```json
/// {
///   "iss": "keyward-auth-service",
///   "sub": "alice",
///   "sid": 42,
///   "fid": "<sha256 hex of \"alice:42\">",
///   "jti": "<uuid4 hex>",
///   "iat": 1700000000,
///   "exp": 1700001800,
///   "nbf": 1700001620
/// }
/// ```
///
/// `nbf` is only present on refresh tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject the token was issued to.
    pub sub: String,
    /// Session identifier of the subject.
    pub sid: i64,
    /// Refresh-token family identifier.
    pub fid: String,
    /// Unique token identifier.
    pub jti: String,
    /// Issued at (Unix seconds).
    pub iat: u64,
    /// Expiration time (Unix seconds).
    pub exp: u64,
    /// Not before (Unix seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
}

/// The two kinds of token, distinguished by the `typ` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    /// Short-lived token presented on every request.
    Access,
    /// Longer-lived token exchanged for a new token pair.
    Refresh,
}

impl TokenType {
    /// `typ` header value.
    #[must_use]
    pub fn typ(self) -> &'static str {
        match self {
            Self::Access => "JWT",
            Self::Refresh => "JWT+refresh",
        }
    }

    /// Parses a `typ` header value.
    #[must_use]
    pub fn from_typ(typ: &str) -> Option<Self> {
        match typ {
            "JWT" => Some(Self::Access),
            "JWT+refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.typ())
    }
}

/// Optional relaxations of token verification.
///
/// The signature, issuer and `typ` are always checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Reject tokens past `exp` (plus leeway).
    pub verify_exp: bool,
    /// Reject tokens before `nbf` (minus leeway).
    pub verify_nbf: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { verify_exp: true, verify_nbf: true }
    }
}

impl DecodeOptions {
    /// Options that accept expired tokens, e.g. to identify the family of a
    /// token presented at logout.
    #[must_use]
    pub fn allow_expired() -> Self {
        Self { verify_exp: false, ..Self::default() }
    }
}

/// Decode JWT header without verification.
///
/// # Errors
///
/// Returns an error if the JWT header cannot be decoded.
pub fn decode_token_header(token: &str) -> Result<Header, AuthError> {
    decode_header(token)
        .map_err(|e| AuthError::InvalidTokenFormat(format!("Failed to decode JWT header: {}", e)))
}

/// Decode JWT claims without verification.
///
/// Only used to recover the family id of a token whose verification failed
/// after the signature was checked.
///
/// # Errors
///
/// Returns an error if:
/// - The JWT does not have exactly 3 parts
/// - The payload cannot be base64-decoded
/// - The payload cannot be parsed as claims
pub fn decode_unverified_claims(token: &str) -> Result<TokenClaims, AuthError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidTokenFormat("JWT must have 3 parts separated by dots".into()));
    }

    let payload_bytes = URL_SAFE_NO_PAD.decode(parts[1]).map_err(|e| {
        AuthError::InvalidTokenFormat(format!("Failed to decode JWT payload: {}", e))
    })?;

    serde_json::from_slice(&payload_bytes)
        .map_err(|e| AuthError::InvalidTokenFormat(format!("Failed to parse JWT claims: {}", e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use serde_json::json;

    use super::*;

    fn raw_token(header: &serde_json::Value, payload: &serde_json::Value) -> String {
        format!(
            "{}.{}.c2ln",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    fn claims_json() -> serde_json::Value {
        json!({
            "iss": "keyward-auth-service",
            "sub": "alice",
            "sid": 42,
            "fid": "f00",
            "jti": "j1",
            "iat": 1_700_000_000u64,
            "exp": 1_700_001_800u64,
        })
    }

    #[test]
    fn test_token_type_typ_round_trip() {
        assert_eq!(TokenType::Access.typ(), "JWT");
        assert_eq!(TokenType::Refresh.typ(), "JWT+refresh");
        assert_eq!(TokenType::from_typ("JWT"), Some(TokenType::Access));
        assert_eq!(TokenType::from_typ("JWT+refresh"), Some(TokenType::Refresh));
        assert_eq!(TokenType::from_typ("at+jwt"), None);
    }

    #[test]
    fn test_decode_unverified_claims() {
        let token = raw_token(&json!({"alg": "ES256", "typ": "JWT"}), &claims_json());
        let claims = decode_unverified_claims(&token).unwrap();

        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.sid, 42);
        assert_eq!(claims.fid, "f00");
        assert!(claims.nbf.is_none());
    }

    #[test]
    fn test_decode_unverified_claims_rejects_wrong_part_count() {
        let result = decode_unverified_claims("a.b");
        assert!(matches!(result, Err(AuthError::InvalidTokenFormat(ref m)) if m.contains("3 parts")));
    }

    #[test]
    fn test_decode_unverified_claims_rejects_missing_fid() {
        let mut payload = claims_json();
        payload.as_object_mut().unwrap().remove("fid");
        let token = raw_token(&json!({"alg": "ES256"}), &payload);

        assert!(matches!(decode_unverified_claims(&token), Err(AuthError::InvalidTokenFormat(_))));
    }

    #[test]
    fn test_decode_token_header() {
        let token =
            raw_token(&json!({"alg": "ES256", "typ": "JWT+refresh", "kid": "123"}), &claims_json());
        let header = decode_token_header(&token).unwrap();

        assert_eq!(header.kid.as_deref(), Some("123"));
        assert_eq!(header.typ.as_deref(), Some("JWT+refresh"));
    }

    #[test]
    fn test_decode_token_header_garbage() {
        assert!(matches!(decode_token_header("not-a-jwt"), Err(AuthError::InvalidTokenFormat(_))));
    }

    #[test]
    fn test_claims_serialization_skips_absent_nbf() {
        let claims: TokenClaims = serde_json::from_value(claims_json()).unwrap();
        let json = serde_json::to_string(&claims).unwrap();
        assert!(!json.contains("nbf"));

        let with_nbf = TokenClaims { nbf: Some(1), ..claims };
        assert!(serde_json::to_string(&with_nbf).unwrap().contains(r#""nbf":1"#));
    }

    #[test]
    fn test_decode_options_defaults() {
        let options = DecodeOptions::default();
        assert!(options.verify_exp && options.verify_nbf);
        assert!(!DecodeOptions::allow_expired().verify_exp);
    }
}
