//! HTTP middleware for the JWKS issuer.
//!
//! - `auth` - Bearer token validation for protected routes
//! - `http_metrics` - request metrics for every response

pub mod auth;
pub mod http_metrics;

pub use auth::require_token;
pub use http_metrics::http_metrics_middleware;
