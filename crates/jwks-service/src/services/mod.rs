//! Key lifecycle and token services.
//!
//! - [`rotator`] is the only writer of the key store
//! - [`jwks_publisher`], [`signing_service`] and [`verification_service`]
//!   read store snapshots

pub mod jwks_publisher;
pub mod rotator;
pub mod signing_service;
pub mod verification_service;

pub use jwks_publisher::{CacheStatus, JwksDocument, JwksPublisher};
pub use rotator::{KeyGenerator, RotationPhase, RotationPolicy, Rotator, SystemKeyGenerator};
pub use signing_service::{SignedToken, SigningService, TokenSettings};
pub use verification_service::{VerificationService, VerifiedToken};
