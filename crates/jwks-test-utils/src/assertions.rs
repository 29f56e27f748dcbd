//! Custom test assertions for expressive tests
//!
//! Provides trait-based assertions for issued tokens and JWKS documents.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;

/// Parameters that must never appear in a published JWK.
pub const PRIVATE_JWK_PARAMETERS: &[&str] = &["d", "p", "q", "dp", "dq", "qi", "k", "oth"];

#[derive(Debug, Deserialize)]
struct JwtHeader {
    pub alg: String,
    pub typ: String,
    #[serde(default)]
    pub kid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

fn decode_segment<T: for<'de> Deserialize<'de>>(token: &str, index: usize) -> T {
    let segment = token
        .split('.')
        .nth(index)
        .unwrap_or_else(|| panic!("JWT is missing segment {}", index));
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .unwrap_or_else(|e| panic!("Failed to base64 decode JWT segment {}: {}", index, e));
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("Failed to parse JWT segment {} JSON: {}", index, e))
}

/// Custom assertions for issued tokens
///
/// # Example
/// ```rust,ignore
/// token
///     .assert_valid_jwt()
///     .assert_signed_by(TEST_KEY_ID_1)
///     .assert_for_subject(TEST_SUBJECT_ALICE);
/// ```
pub trait TokenAssertions {
    /// Assert compact JWS form with `typ: JWT`, a supported `alg` and a `kid`
    fn assert_valid_jwt(&self) -> &Self;

    /// Assert that the token header names the specified key
    fn assert_signed_by(&self, key_id: &str) -> &Self;

    /// Assert that `exp - iat` equals the specified seconds
    fn assert_expires_in(&self, seconds: i64) -> &Self;

    /// Assert that the token is for the specified subject
    fn assert_for_subject(&self, subject: &str) -> &Self;
}

impl TokenAssertions for String {
    fn assert_valid_jwt(&self) -> &Self {
        let parts = self.split('.').count();
        assert_eq!(
            parts, 3,
            "JWT must have 3 parts (header.payload.signature), got {}",
            parts
        );

        let header: JwtHeader = decode_segment(self, 0);
        assert!(
            matches!(header.alg.as_str(), "EdDSA" | "ES256" | "PS512"),
            "Unexpected algorithm {}",
            header.alg
        );
        assert_eq!(header.typ, "JWT", "Expected JWT type");
        assert!(
            header.kid.as_deref().is_some_and(|kid| !kid.is_empty()),
            "JWT header must carry a kid"
        );
        self
    }

    fn assert_signed_by(&self, key_id: &str) -> &Self {
        let header: JwtHeader = decode_segment(self, 0);
        assert_eq!(
            header.kid.as_deref(),
            Some(key_id),
            "Expected token signed by {}",
            key_id
        );
        self
    }

    fn assert_expires_in(&self, seconds: i64) -> &Self {
        let claims: JwtClaims = decode_segment(self, 1);
        assert_eq!(
            claims.exp - claims.iat,
            seconds,
            "Expected token lifetime of {} seconds",
            seconds
        );
        self
    }

    fn assert_for_subject(&self, subject: &str) -> &Self {
        let claims: JwtClaims = decode_segment(self, 1);
        assert_eq!(claims.sub, subject, "Expected subject {}", subject);
        self
    }
}

/// Custom assertions for JWKS documents (parsed JSON)
pub trait JwksAssertions {
    /// Assert the number of published keys
    fn assert_key_count(&self, count: usize) -> &Self;

    /// Assert that a key with `kid` is published
    fn assert_has_kid(&self, kid: &str) -> &Self;

    /// Assert that no key with `kid` is published
    fn assert_lacks_kid(&self, kid: &str) -> &Self;

    /// Assert that no key carries private parameters (`d`, `p`, `q`, ...)
    fn assert_no_private_parameters(&self) -> &Self;

    /// Assert every key is a signing key with the fields verifiers need
    fn assert_well_formed(&self) -> &Self;
}

fn jwks_keys(jwks: &serde_json::Value) -> &Vec<serde_json::Value> {
    jwks.get("keys")
        .and_then(|k| k.as_array())
        .unwrap_or_else(|| panic!("JWKS must have a keys array: {}", jwks))
}

fn jwks_kids(jwks: &serde_json::Value) -> Vec<String> {
    jwks_keys(jwks)
        .iter()
        .filter_map(|k| k.get("kid").and_then(|v| v.as_str()).map(ToString::to_string))
        .collect()
}

impl JwksAssertions for serde_json::Value {
    fn assert_key_count(&self, count: usize) -> &Self {
        assert_eq!(
            jwks_keys(self).len(),
            count,
            "Expected {} published keys, got kids {:?}",
            count,
            jwks_kids(self)
        );
        self
    }

    fn assert_has_kid(&self, kid: &str) -> &Self {
        let kids = jwks_kids(self);
        assert!(
            kids.iter().any(|k| k == kid),
            "Expected kid {} in JWKS, got {:?}",
            kid,
            kids
        );
        self
    }

    fn assert_lacks_kid(&self, kid: &str) -> &Self {
        let kids = jwks_kids(self);
        assert!(
            !kids.iter().any(|k| k == kid),
            "Expected kid {} absent from JWKS, got {:?}",
            kid,
            kids
        );
        self
    }

    fn assert_no_private_parameters(&self) -> &Self {
        for key in jwks_keys(self) {
            for param in PRIVATE_JWK_PARAMETERS {
                assert!(
                    key.get(*param).is_none(),
                    "JWKS key {} leaks private parameter {}",
                    key,
                    param
                );
            }
        }
        self
    }

    fn assert_well_formed(&self) -> &Self {
        for key in jwks_keys(self) {
            let type_fields: &[&str] = if key["kty"] == "RSA" {
                &["n", "e"]
            } else {
                &["crv", "x"]
            };
            for field in ["kid", "kty", "alg", "use"].iter().chain(type_fields) {
                assert!(
                    key.get(field).and_then(|v| v.as_str()).is_some(),
                    "JWKS key {} is missing {}",
                    key,
                    field
                );
            }
            assert_eq!(key["use"], "sig", "JWKS key {} is not a signing key", key);
            if key["kty"] == "EC" {
                assert!(key.get("y").is_some(), "EC key {} is missing y", key);
            }
        }
        self
    }
}
