//! Observability for the JWKS issuer.
//!
//! Handlers and services use `#[instrument(skip_all)]` and add fields
//! explicitly. Fields fall into three groups:
//! - **SAFE**: key ids, algorithms, statuses, store versions
//! - **HASHED**: token subjects, via [`hash_for_correlation`]
//! - **NEVER**: private keys, master key, full tokens

pub mod metrics;

use sha2::{Digest, Sha256};

/// SHA-256 of `value`, first 8 hex chars.
///
/// Enough to correlate log lines for one subject without storing it.
pub fn hash_for_correlation(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest.get(..4).unwrap_or_default())
}
