//! Public key set document.
//!
//! The document lists the public half of every valid signing key as an EC
//! JWK, oldest first, so relying parties can verify tokens without access
//! to the key store.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use p256::{PublicKey, elliptic_curve::sec1::ToEncodedPoint, pkcs8::DecodePublicKey};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AuthError, Result},
    key::KeyMetadata,
};

/// A single public EC key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `EC`.
    pub kty: String,
    /// JWT algorithm.
    pub alg: String,
    /// Curve name.
    pub crv: String,
    /// Intended use, always `sig`.
    #[serde(rename = "use")]
    pub use_: String,
    /// Key identifier.
    pub kid: String,
    /// Base64url affine x coordinate.
    pub x: String,
    /// Base64url affine y coordinate.
    pub y: String,
}

impl Jwk {
    /// Builds a JWK from a P-256 public key PEM.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if the PEM is not a P-256 public key.
    pub fn from_public_pem(kid: &str, alg: &str, public_pem: &str) -> Result<Self> {
        let public = PublicKey::from_public_key_pem(public_pem.trim())
            .map_err(|e| AuthError::key_material(format!("invalid public key for {kid}: {e}")))?;
        let point = public.to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(AuthError::key_material(format!("public key for {kid} is the identity")));
        };

        Ok(Self {
            kty: "EC".into(),
            alg: alg.to_owned(),
            crv: "P-256".into(),
            use_: "sig".into(),
            kid: kid.to_owned(),
            x: URL_SAFE_NO_PAD.encode(x),
            y: URL_SAFE_NO_PAD.encode(y),
        })
    }
}

/// The public key set document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// Keys, oldest first.
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Builds the document from keys ordered oldest first, keeping the
    /// newest `cap`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if a public key cannot be parsed.
    pub fn from_keys<'a>(
        keys: impl IntoIterator<Item = &'a KeyMetadata>,
        cap: usize,
    ) -> Result<Self> {
        let mut jwks = keys.into_iter().map(KeyMetadata::jwk).collect::<Result<Vec<_>>>()?;
        let excess = jwks.len().saturating_sub(cap);
        jwks.drain(..excess);
        Ok(Self { keys: jwks })
    }

    /// Kids in document order.
    #[must_use]
    pub fn kids(&self) -> Vec<&str> {
        self.keys.iter().map(|k| k.kid.as_str()).collect()
    }

    /// Serializes the document as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| AuthError::key_material_with_source("JWKS serialization failed", e))
    }

    /// Parses a document.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyMaterial`] if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AuthError::key_material_with_source("JWKS parsing failed", e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_has_ec_shape() {
        let key = KeyMetadata::generate("123").unwrap();
        let jwk = key.jwk().unwrap();

        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv, "P-256");
        assert_eq!(jwk.alg, "ES256");
        assert_eq!(jwk.use_, "sig");
        assert_eq!(jwk.kid, "123");
        // 32-byte coordinates encode to 43 unpadded base64url characters.
        assert_eq!(jwk.x.len(), 43);
        assert_eq!(jwk.y.len(), 43);
        assert_eq!(URL_SAFE_NO_PAD.decode(&jwk.x).unwrap().len(), 32);
    }

    #[test]
    fn test_jwks_keeps_newest_and_orders_oldest_first() {
        let keys: Vec<_> =
            ["a", "b", "c", "d"].iter().map(|kid| KeyMetadata::generate(*kid).unwrap()).collect();

        let jwks = Jwks::from_keys(&keys, 3).unwrap();

        assert_eq!(jwks.kids(), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_jwks_json_uses_use_field_and_omits_private_material() {
        let key = KeyMetadata::generate("123").unwrap();
        let json = Jwks::from_keys([&key], 3).unwrap().to_json().unwrap();

        assert!(json.contains(r#""use": "sig""#));
        assert!(!json.contains("PRIVATE"));
        assert!(!json.contains(r#""d""#));

        let parsed = Jwks::from_json(&json).unwrap();
        assert_eq!(parsed.kids(), vec!["123"]);
    }
}
