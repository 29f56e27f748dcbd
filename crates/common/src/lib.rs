//! Shared building blocks for the JWKS issuer workspace.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (claims, header inspection, time checks)
pub mod jwt;
