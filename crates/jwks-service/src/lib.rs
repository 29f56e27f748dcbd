//! JWKS issuer library
//!
//! Publishes a JSON Web Key Set and rotates the signing keys behind it
//! without breaking verification of tokens already in flight.
//!
//! # Modules
//!
//! - `config` - Service configuration
//! - `crypto` - Key generation, import, sealing and JWT signing
//! - `errors` - Error types
//! - `handlers` - HTTP request handlers
//! - `keystore` - Versioned in-memory key store
//! - `models` - Key material and wire types
//! - `repositories` - Key file persistence
//! - `services` - Rotation, publication, signing and verification

pub mod config;
pub mod crypto;
pub mod errors;
pub mod handlers;
pub mod keystore;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
