//! JWT algorithm and key identifier validation.
//!
//! Tokens are only ever signed with ES256. Every header is checked before
//! any key lookup so that algorithm substitution (`none`, HMAC with the
//! public key as secret) is rejected up front.

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted.
///
/// - `none`: No signature verification (trivially bypassable)
/// - `HS256`, `HS384`, `HS512`: Symmetric algorithms (shared secret vulnerability)
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted JWT algorithms.
///
/// Only ES256 (ECDSA over P-256 with SHA-256) is produced by the key
/// bootstrap and rotation code, so it is the only algorithm verified.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["ES256"];

/// Maximum accepted length of a key identifier.
pub const MAX_KID_LEN: usize = 64;

/// Validate JWT algorithm against security policies.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if:
/// - Algorithm is symmetric (HS256, HS384, HS512)
/// - Algorithm is "none"
/// - Algorithm is not in [`ACCEPTED_ALGORITHMS`]
///
/// # Examples
///
/// ```
/// use keyward_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("ES256").is_ok());
/// assert!(validate_algorithm("EdDSA").is_err());
/// assert!(validate_algorithm("HS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|f| f.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not allowed for security reasons",
            alg
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not in accepted list (only ES256 is supported)",
            alg
        )));
    }

    Ok(())
}

/// Validate a key identifier.
///
/// Key ids end up in file names (`private_{kid}_key.pem`) and coordination
/// store fields, so they are restricted to ASCII alphanumerics, `-` and `_`.
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the kid is empty, longer than
/// [`MAX_KID_LEN`], or contains other characters.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::InvalidTokenFormat("kid cannot be empty".into()));
    }
    if kid.len() > MAX_KID_LEN {
        return Err(AuthError::InvalidTokenFormat(format!(
            "kid exceeds {MAX_KID_LEN} characters"
        )));
    }
    if !kid.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
        return Err(AuthError::InvalidTokenFormat(format!("kid '{kid}' contains invalid characters")));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_validate_algorithm_es256_accepted() {
        assert!(validate_algorithm("ES256").is_ok());
    }

    #[rstest]
    #[case("EdDSA")]
    #[case("RS256")]
    #[case("ES384")]
    #[case("es256")]
    fn test_validate_algorithm_not_in_list(#[case] alg: &str) {
        let result = validate_algorithm(alg);
        assert!(
            matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not in accepted list"))
        );
    }

    #[test]
    fn test_forbidden_algorithms_each_rejected_with_security_message() {
        for alg in FORBIDDEN_ALGORITHMS {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("not allowed for security reasons")),
                "Expected security rejection for forbidden algorithm '{alg}'"
            );
        }
    }

    #[test]
    fn test_none_rejected_case_insensitively() {
        for alg in ["None", "NONE", "nOnE"] {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(AuthError::UnsupportedAlgorithm(ref msg)) if msg.contains("security")),
                "'{alg}' must be rejected"
            );
        }
    }

    #[test]
    fn test_forbidden_and_accepted_lists_are_disjoint() {
        for alg in ACCEPTED_ALGORITHMS {
            assert!(!FORBIDDEN_ALGORITHMS.contains(alg));
        }
    }

    #[rstest]
    #[case("123")]
    #[case("a1b2c3d4e5f6a7b8")]
    #[case("key_2024-01")]
    fn test_validate_kid_accepts(#[case] kid: &str) {
        assert!(validate_kid(kid).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("../etc/passwd")]
    #[case("kid with space")]
    #[case("kid:colon")]
    fn test_validate_kid_rejects(#[case] kid: &str) {
        assert!(matches!(validate_kid(kid), Err(AuthError::InvalidTokenFormat(_))));
    }

    #[test]
    fn test_validate_kid_rejects_overlong() {
        let kid = "a".repeat(MAX_KID_LEN + 1);
        assert!(validate_kid(&kid).is_err());
        assert!(validate_kid(&kid[..MAX_KID_LEN]).is_ok());
    }
}
