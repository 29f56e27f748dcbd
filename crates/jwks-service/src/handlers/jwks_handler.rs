use crate::errors::ApiError;
use crate::observability::metrics::record_jwks_request;
use crate::routes::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{
        header::{HeaderMap, HeaderValue, CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH},
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

pub const JWKS_CONTENT_TYPE: &str = "application/jwk-set+json";
/// Kept in step with [`crate::config::JWKS_MAX_AGE_SECONDS`], which bounds
/// the overlap delay from below.
pub const JWKS_CACHE_CONTROL: &str = "public, max-age=300";

/// Handle JWKS request
///
/// GET /.well-known/jwks.json
///
/// Returns every published public key (RFC 7517). A matching
/// `If-None-Match` gets 304 with no body.
#[instrument(name = "jwks.get", skip_all, fields(cache_status, status))]
pub async fn get_jwks(
    State(state): State<Arc<AppState>>,
    request_headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (document, cache_status) = match state.publisher.document(Utc::now()) {
        Ok(found) => found,
        Err(e) => {
            tracing::Span::current().record("status", "error");
            record_jwks_request("error");
            return Err(e.into());
        }
    };

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(JWKS_CACHE_CONTROL));
    if let Ok(etag) = HeaderValue::from_str(&document.etag) {
        headers.insert(ETAG, etag);
    }

    let not_modified = request_headers
        .get(IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| etag_matches(v, &document.etag));

    let label = if not_modified {
        "not_modified"
    } else {
        cache_status.as_str()
    };
    let span = tracing::Span::current();
    span.record("cache_status", label);
    span.record("status", "success");
    record_jwks_request(label);

    if not_modified {
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JWKS_CONTENT_TYPE));
    Ok((StatusCode::OK, headers, Body::from(document.body.clone())).into_response())
}

/// `If-None-Match` uses weak comparison, so `W/` prefixes are ignored.
fn etag_matches(if_none_match: &str, etag: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}
