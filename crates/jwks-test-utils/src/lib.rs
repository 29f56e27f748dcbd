//! # JWKS Test Utilities
//!
//! Shared test utilities for the JWKS issuer.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed seeds, private JWKs, master key)
//! - Rotation time helpers (fixed clock, scenario policy)
//! - Server test harness (TestJwksServer for E2E tests)
//! - Fixed test IDs and subjects
//! - Custom assertions (TokenAssertions, JwksAssertions)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jwks_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestJwksServer::spawn().await?;
//!     let jwks = server.fetch_jwks().await?;
//!
//!     jwks.assert_key_count(1).assert_no_private_parameters();
//!     Ok(())
//! }
//! ```

pub mod assertions;
pub mod crypto_fixtures;
pub mod rotation_time;
pub mod server_harness;
pub mod test_ids;

// Re-export commonly used items
pub use assertions::*;
pub use crypto_fixtures::*;
pub use rotation_time::*;
pub use server_harness::*;
pub use test_ids::*;
