//! Secret wrappers for private key material.
//!
//! Re-exports the [`secrecy`] types used across the workspace. Anything that
//! can sign a token or unseal a key file lives in one of these:
//!
//! - `SecretBox<Vec<u8>>` for PKCS#8 private keys and the key-file master key
//! - `SecretString` for private JWK JSON supplied through the environment
//!
//! Both print `[REDACTED]` under `Debug`, so structs that derive `Debug` stay
//! safe to log, and both zeroize their buffer on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretBox};
//!
//! let pkcs8 = SecretBox::new(Box::new(vec![0x30, 0x53, 0x02, 0x01]));
//! assert!(format!("{pkcs8:?}").contains("REDACTED"));
//! assert_eq!(pkcs8.expose_secret().len(), 4);
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Clone a boxed byte secret.
///
/// `SecretBox` is deliberately not `Clone`; call sites that must duplicate key
/// bytes go through here so the copy is explicit and greppable.
#[must_use]
pub fn clone_secret_bytes(secret: &SecretBox<Vec<u8>>) -> SecretBox<Vec<u8>> {
    SecretBox::new(Box::new(secret.expose_secret().clone()))
}
