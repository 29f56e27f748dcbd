//! Deterministic cryptographic fixtures for testing
//!
//! Ed25519 fixtures are derived from seed values, so the same seed always
//! yields the same key. RSA cannot be derived cheaply, so the PS512 fixture
//! is a fixed 2048-bit private JWK.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use jwks_service::crypto::{ed25519_key_from_seed, KeyAlgorithm};
use jwks_service::models::KeyMaterial;
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Expand a one-byte seed into a 32-byte Ed25519 seed.
pub fn test_seed(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// A pending Ed25519 key built from `seed`.
///
/// # Example
/// ```rust,ignore
/// let key = test_signing_key(TEST_SEED_1, TEST_KEY_ID_1, Utc::now())?;
/// store.activate_initial_key(key)?;
/// ```
pub fn test_signing_key(
    seed: u8,
    key_id: &str,
    created_at: DateTime<Utc>,
) -> Result<KeyMaterial, FixtureError> {
    let generated = ed25519_key_from_seed(&test_seed(seed), None)
        .map_err(|e| FixtureError::Crypto(format!("Failed to build test key: {}", e)))?;
    Ok(generated.into_pending(key_id.to_string(), KeyAlgorithm::EdDsa, created_at))
}

/// Private Ed25519 JWK for `seed`, as accepted by `JWK_PRIVATE_JSON`.
pub fn test_private_jwk(seed: u8, key_id: Option<&str>) -> Result<String, FixtureError> {
    let seed_bytes = test_seed(seed);
    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;

    let mut jwk = serde_json::json!({
        "kty": "OKP",
        "crv": "Ed25519",
        "alg": "EdDSA",
        "d": URL_SAFE_NO_PAD.encode(seed_bytes),
        "x": URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref()),
    });
    if let Some(kid) = key_id {
        jwk["kid"] = serde_json::Value::String(kid.to_string());
    }
    Ok(jwk.to_string())
}

/// Private RSA JWK (`alg: PS512`, kid [`crate::TEST_RSA_KEY_ID`]), as
/// accepted by `JWK_PRIVATE_JSON`.
pub const TEST_RSA_PRIVATE_JWK: &str = include_str!("../fixtures/rsa_private_jwk.json");

/// Public `x` coordinate for `seed`, base64url.
pub fn test_public_x(seed: u8) -> Result<String, FixtureError> {
    let key_pair = Ed25519KeyPair::from_seed_unchecked(&test_seed(seed))
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e)))?;
    Ok(URL_SAFE_NO_PAD.encode(key_pair.public_key().as_ref()))
}

/// Fixed 32-byte master key for key file tests.
pub fn test_master_key() -> Vec<u8> {
    (0u8..32).map(|i| i.wrapping_mul(7).wrapping_add(3)).collect()
}

/// [`test_master_key`] encoded for `KEY_STORE_MASTER_KEY`.
pub fn test_master_key_base64() -> String {
    STANDARD.encode(test_master_key())
}
