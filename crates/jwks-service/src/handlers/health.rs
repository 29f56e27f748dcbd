//! Liveness and readiness probes.
//!
//! - `/health`: the process is up
//! - `/ready`: a signing key is active, so tokens can be issued and the
//!   JWKS document can be served

use crate::models::ReadinessResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

/// Liveness probe handler. Checks nothing.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Returns 200 while an active key exists, 503 otherwise.
#[tracing::instrument(skip_all, name = "jwks.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.store.snapshot();
    let published_keys = snapshot
        .published(Utc::now(), state.store.retention())
        .len();

    match snapshot.active() {
        Some(active) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                active_key_id: Some(active.key_id.clone()),
                published_keys,
            }),
        ),
        None => {
            tracing::warn!(target: "jwks.health", "Readiness check failed: no active signing key");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "not_ready".to_string(),
                    active_key_id: None,
                    published_keys,
                }),
            )
        }
    }
}
