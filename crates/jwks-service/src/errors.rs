//! Error types for key lifecycle, token operations and the HTTP surface.
//!
//! `KeyError` is the domain taxonomy returned by the store, rotator and the
//! signing/verification services. `ApiError` is what handlers return; it maps
//! to a status code and a JSON `{ "error": { code, message } }` body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::GENERIC_REJECTION;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("No active signing key")]
    NoActiveKey,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Unknown key id")]
    UnknownKey,

    #[error("Signature does not match")]
    SignatureMismatch,

    #[error("Key retention window has elapsed")]
    ExpiredKey,

    #[error("Key has been revoked")]
    RevokedKey,

    #[error("Invalid claims: {0}")]
    InvalidClaims(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key transition: {0}")]
    InvalidTransition(String),

    #[error("Duplicate key id: {0}")]
    DuplicateKeyId(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Key persistence failed: {0}")]
    Persistence(String),

    #[error("Key store update was not applied")]
    StoreContention,
}

impl KeyError {
    /// True for the variants produced by token verification.
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            KeyError::UnknownKey
                | KeyError::SignatureMismatch
                | KeyError::ExpiredKey
                | KeyError::RevokedKey
                | KeyError::InvalidClaims(_)
        )
    }

    /// Bounded label used for validation metrics.
    pub fn category(&self) -> &'static str {
        match self {
            KeyError::NoActiveKey => "no_active_key",
            KeyError::Signing(_) => "signing",
            KeyError::UnknownKey => "unknown_key",
            KeyError::SignatureMismatch => "signature_mismatch",
            KeyError::ExpiredKey => "expired_key",
            KeyError::RevokedKey => "revoked_key",
            KeyError::InvalidClaims(_) => "invalid_claims",
            KeyError::KeyGeneration(_) => "key_generation",
            KeyError::InvalidTransition(_) => "invalid_transition",
            KeyError::DuplicateKeyId(_) => "duplicate_key_id",
            KeyError::KeyNotFound(_) => "key_not_found",
            KeyError::Persistence(_) => "persistence",
            KeyError::StoreContention => "store_contention",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Service unavailable: {0}")]
    Unavailable(KeyError),

    #[error("Invalid token: {0}")]
    InvalidToken(KeyError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(KeyError),
}

impl From<KeyError> for ApiError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::NoActiveKey => ApiError::Unavailable(err),
            e if e.is_verification_failure() => ApiError::InvalidToken(e),
            e => ApiError::Internal(e),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "NO_ACTIVE_KEY",
                "No signing key is available".to_string(),
            ),
            ApiError::InvalidToken(_) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                GENERIC_REJECTION.to_string(),
            ),
            ApiError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: ErrorDetail { code, message },
            }),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer error=\"invalid_token\""),
            );
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_verification_failures_are_classified() {
        assert!(KeyError::UnknownKey.is_verification_failure());
        assert!(KeyError::RevokedKey.is_verification_failure());
        assert!(KeyError::InvalidClaims("exp".into()).is_verification_failure());
        assert!(!KeyError::NoActiveKey.is_verification_failure());
        assert!(!KeyError::Persistence("disk".into()).is_verification_failure());
    }

    #[test]
    fn test_key_error_maps_to_api_error() {
        assert!(matches!(
            ApiError::from(KeyError::NoActiveKey),
            ApiError::Unavailable(_)
        ));
        assert!(matches!(
            ApiError::from(KeyError::SignatureMismatch),
            ApiError::InvalidToken(_)
        ));
        assert!(matches!(
            ApiError::from(KeyError::Signing("ring".into())),
            ApiError::Internal(_)
        ));
    }

    #[tokio::test]
    async fn test_invalid_token_response_is_generic() {
        let (status, json) = body_json(ApiError::from(KeyError::ExpiredKey)).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "INVALID_TOKEN");
        assert_eq!(json["error"]["message"], GENERIC_REJECTION);
    }

    #[tokio::test]
    async fn test_invalid_token_response_sets_www_authenticate() {
        let response = ApiError::from(KeyError::UnknownKey).into_response();
        assert!(response
            .headers()
            .get(axum::http::header::WWW_AUTHENTICATE)
            .is_some());
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let (status, json) =
            body_json(ApiError::from(KeyError::Signing("secret detail".into()))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!json.to_string().contains("secret detail"));
    }

    #[tokio::test]
    async fn test_no_active_key_is_503() {
        let (status, json) = body_json(ApiError::from(KeyError::NoActiveKey)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], "NO_ACTIVE_KEY");
    }
}
