//! Token issuance and validation endpoints.
//!
//! Demo surface only: any caller may request a token for any subject.

use crate::errors::ApiError;
use crate::models::{IssueTokenRequest, PingResponse, TokenResponse};
use crate::observability::hash_for_correlation;
use crate::routes::AppState;
use crate::services::VerifiedToken;
use axum::{extract::State, Extension, Json};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Longest accepted `sub`, in characters.
pub const MAX_SUBJECT_LENGTH: usize = 256;

/// Handle token issuance
///
/// POST /api/v1/tokens
#[instrument(name = "jwks.tokens.issue", skip_all, fields(subject_hash, key_id))]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IssueTokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let subject = request.sub.trim();
    if subject.is_empty() {
        return Err(ApiError::BadRequest("sub must not be empty".to_string()));
    }
    if subject.chars().count() > MAX_SUBJECT_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "sub must not exceed {} characters",
            MAX_SUBJECT_LENGTH
        )));
    }

    let span = tracing::Span::current();
    span.record("subject_hash", hash_for_correlation(subject).as_str());

    let signed = state.signer.issue_token(subject, Utc::now())?;
    span.record("key_id", signed.key_id.as_str());

    let expires_in = u64::try_from(signed.claims.exp - signed.claims.iat).unwrap_or(0);
    Ok(Json(TokenResponse {
        access_token: signed.token,
        token_type: "Bearer".to_string(),
        expires_in,
        key_id: signed.key_id,
    }))
}

/// Handle an authenticated ping
///
/// GET /api/v1/ping
///
/// Token validation happens in [`crate::middleware::require_token`].
#[instrument(name = "jwks.ping", skip_all, fields(key_id))]
pub async fn ping(Extension(verified): Extension<VerifiedToken>) -> Json<PingResponse> {
    tracing::Span::current().record("key_id", verified.key_id.as_str());
    Json(PingResponse {
        ok: true,
        message: "Validation successful".to_string(),
        now: Utc::now().timestamp(),
        kid: verified.key_id,
        claims: verified.claims,
    })
}
