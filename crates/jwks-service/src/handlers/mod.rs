//! HTTP request handlers for the JWKS issuer.

pub mod health;
pub mod jwks_handler;
pub mod metrics;
pub mod token_handler;

pub use health::{health_check, readiness_check};
pub use jwks_handler::get_jwks;
pub use metrics::metrics_handler;
pub use token_handler::{issue_token, ping};
