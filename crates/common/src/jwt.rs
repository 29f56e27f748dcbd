//! JWT helpers shared by the signing and verification paths.
//!
//! - Size limit applied before any parsing
//! - Unverified `kid` extraction for key lookup during rotation
//! - Time-claim checks (`iat` skew, `nbf`/`exp` leeway) against an explicit `now`
//! - The registered claim set issued by this workspace
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE base64 decoding
//! - Every error renders the same generic message; details go to `debug!`
//! - `sub` and `jti` are redacted in `Debug` output

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted JWT size in bytes (8KB).
///
/// A signed token from this issuer is a few hundred bytes. Anything above the
/// limit is rejected before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance for `iat` (5 minutes).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound on configurable clock skew (10 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Generic rejection message shared by every validation failure.
pub const GENERIC_REJECTION: &str = "The access token is invalid or expired";

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised while inspecting or time-checking a JWT.
///
/// All variants display the same message so callers can surface them without
/// leaking which check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Not a three-part compact JWS, or the header is not valid base64url JSON.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Header has no non-empty string `kid`.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// `iat` lies further in the future than the clock skew allows.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// `exp` has passed (after leeway).
    #[error("The access token is invalid or expired")]
    Expired,

    /// `nbf` is still in the future (after leeway).
    #[error("The access token is invalid or expired")]
    NotYetValid,
}

// =============================================================================
// Claims
// =============================================================================

/// Registered claims carried by every token this issuer signs.
///
/// Timestamps are Unix epoch seconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub aud: String,
    /// Subject; redacted in `Debug` output.
    pub sub: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    /// Unique token id; redacted in `Debug` output.
    pub jti: String,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("iss", &self.iss)
            .field("aud", &self.aud)
            .field("sub", &"[REDACTED]")
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("exp", &self.exp)
            .field("jti", &"[REDACTED]")
            .finish()
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Extract the `kid` header parameter without verifying the signature.
///
/// The result is only a lookup hint. The token must still be verified with
/// the key it names.
///
/// # Errors
///
/// - `TokenTooLarge` when the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` for a wrong segment count, bad base64url or bad JSON
/// - `MissingKid` when `kid` is absent, empty or not a string
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut segments = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "common.jwt", "Token rejected: not a compact JWS");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)
}

/// Reject an `iat` more than `clock_skew` ahead of `now`.
///
/// # Errors
///
/// Returns `IatTooFarInFuture` when `iat > now + clock_skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtValidationError> {
    // Skew is capped at MAX_CLOCK_SKEW by configuration, far below i64::MAX.
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(clock_skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Check `nbf` and `exp` against `now`, tolerating `leeway` on both edges.
///
/// A token is accepted while `nbf - leeway <= now < exp + leeway`.
///
/// # Errors
///
/// Returns `NotYetValid` or `Expired` for the failing edge.
pub fn validate_time_window(
    claims: &TokenClaims,
    leeway: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Leeway is a small configured value.
    #[allow(clippy::cast_possible_wrap)]
    let leeway_secs = leeway.as_secs() as i64;

    if claims.nbf.saturating_sub(leeway_secs) > now {
        tracing::debug!(
            target: "common.jwt",
            nbf = claims.nbf,
            now = now,
            "Token rejected: not yet valid"
        );
        return Err(JwtValidationError::NotYetValid);
    }

    if now >= claims.exp.saturating_add(leeway_secs) {
        tracing::debug!(
            target: "common.jwt",
            exp = claims.exp,
            now = now,
            "Token rejected: expired"
        );
        return Err(JwtValidationError::Expired);
    }

    Ok(())
}

/// Base64url (no padding) encoding used for JWK coordinates.
#[must_use]
pub fn encode_b64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a base64url (no padding) JWK coordinate.
///
/// # Errors
///
/// Returns `base64::DecodeError` when the input is not valid base64url.
pub fn decode_b64url(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value)
}

// =============================================================================
// Tests
// =============================================================================
