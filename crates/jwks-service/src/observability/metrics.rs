//! Metrics definitions for the JWKS issuer.
//!
//! All metrics follow Prometheus naming conventions:
//! - `jwks_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for durations
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `cache_status`: hit, miss, not_modified
//! - `status`: success, error (plus a few rotation outcomes)
//! - `error_category`: bounded by `KeyError::category`
//! - `path`: known routes, everything else is `/other`

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle served on `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns an error if bucket configuration fails or a recorder is already
/// installed in this process.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("jwks_http_request".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.200, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("jwks_token_issuance".to_string()),
            &[0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100],
        )
        .map_err(|e| format!("Failed to set token issuance buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// JWKS Metrics
// ============================================================================

/// Metric: `jwks_requests_total`
/// Labels: `cache_status`
pub fn record_jwks_request(cache_status: &str) {
    counter!("jwks_requests_total", "cache_status" => cache_status.to_string()).increment(1);
}

/// Metric: `jwks_published_keys`
pub fn set_published_keys(count: usize) {
    gauge!("jwks_published_keys").set(count as f64);
}

// ============================================================================
// Key Lifecycle Metrics
// ============================================================================

/// Metric: `jwks_key_rotation_total`
/// Labels: `status` (generated, promoted, completed, error)
pub fn record_key_rotation(status: &str) {
    counter!("jwks_key_rotation_total", "status" => status.to_string()).increment(1);
}

/// Metric: `jwks_keys_purged_total`
pub fn record_keys_purged(count: usize) {
    counter!("jwks_keys_purged_total").increment(count as u64);
}

/// Metric: `jwks_signing_key_age_seconds`
pub fn set_signing_key_age_seconds(age_seconds: f64) {
    gauge!("jwks_signing_key_age_seconds").set(age_seconds);
}

/// Metric: `jwks_store_version`
pub fn set_store_version(version: u64) {
    gauge!("jwks_store_version").set(version as f64);
}

// ============================================================================
// Token Metrics
// ============================================================================

/// Metric: `jwks_token_issuance_duration_seconds`, `jwks_token_issuance_total`
/// Labels: `status`
pub fn record_token_issuance(status: &str, duration: Duration) {
    histogram!("jwks_token_issuance_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());

    counter!("jwks_token_issuance_total", "status" => status.to_string()).increment(1);
}

/// Metric: `jwks_token_validations_total`
/// Labels: `status`, `error_category`
pub fn record_token_validation(status: &str, error_category: Option<&str>) {
    let category = error_category.unwrap_or("none");
    counter!("jwks_token_validations_total", "status" => status.to_string(), "error_category" => category.to_string())
        .increment(1);
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `jwks_http_requests_total`, `jwks_http_request_duration_seconds`
/// Labels: `method`, `path`, `status_code`
///
/// Covers framework-level responses too (404, 405, 415, 400 on bad JSON).
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let normalized_path = normalize_path(path);

    histogram!("jwks_http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => normalized_path,
        "status_code" => status_code.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("jwks_http_requests_total",
        "method" => method.to_string(),
        "path" => normalized_path,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Map a request path onto a bounded label set.
fn normalize_path(path: &str) -> &'static str {
    match path {
        "/.well-known/jwks.json" => "/.well-known/jwks.json",
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/api/v1/tokens" => "/api/v1/tokens",
        "/api/v1/ping" => "/api/v1/ping",
        _ => "/other",
    }
}
