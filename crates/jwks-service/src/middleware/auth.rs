//! Bearer token middleware.
//!
//! Extracts the token from the Authorization header, verifies it against
//! the key store and injects [`crate::services::VerifiedToken`] into request
//! extensions. Every failure becomes the same generic 401.

use crate::errors::{ApiError, KeyError};
use crate::routes::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

fn extract_bearer_token(req: &Request) -> Result<&str, ApiError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "jwks.middleware.auth", "Missing Authorization header");
            ApiError::InvalidToken(KeyError::InvalidClaims(
                "Missing Authorization header".to_string(),
            ))
        })?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            tracing::debug!(target: "jwks.middleware.auth", "Invalid Authorization header format");
            ApiError::InvalidToken(KeyError::InvalidClaims(
                "Invalid Authorization header format".to_string(),
            ))
        })
}

/// Reject requests without a valid Bearer token.
#[instrument(skip_all, name = "jwks.middleware.auth")]
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let token = extract_bearer_token(&req)?;

    let verified = state
        .verifier
        .verify_token(token, Utc::now())
        .map_err(ApiError::InvalidToken)?;

    req.extensions_mut().insert(verified);

    Ok(next.run(req).await)
}
