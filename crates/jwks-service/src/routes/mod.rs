//! HTTP routes for the JWKS issuer.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::keystore::KeyStore;
use crate::middleware::{http_metrics_middleware, require_token};
use crate::services::{JwksPublisher, SigningService, TokenSettings, VerificationService};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    /// Shared key store; written by the rotator only.
    pub store: Arc<KeyStore>,

    pub publisher: Arc<JwksPublisher>,

    pub signer: Arc<SigningService>,

    pub verifier: Arc<VerificationService>,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<KeyStore>) -> Self {
        let settings = TokenSettings::from_config(config);
        Self {
            config: config.clone(),
            publisher: Arc::new(JwksPublisher::new(Arc::clone(&store))),
            signer: Arc::new(SigningService::new(Arc::clone(&store), settings.clone())),
            verifier: Arc::new(VerificationService::new(Arc::clone(&store), settings)),
            store,
        }
    }
}

/// Build the application routes.
///
/// - `/.well-known/jwks.json` - public key set, also the liveness surface
/// - `/health` - liveness probe
/// - `/ready` - readiness probe (active key present)
/// - `/metrics` - Prometheus scrape
/// - `POST /api/v1/tokens` - issue a token
/// - `GET /api/v1/ping` - validate a Bearer token
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/.well-known/jwks.json", get(handlers::get_jwks))
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/api/v1/tokens", post(handlers::issue_token))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/api/v1/ping", get(handlers::ping))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost), sees every response
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
