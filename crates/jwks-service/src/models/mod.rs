//! Key material, JWKS wire types and HTTP payloads.

use crate::crypto::KeyAlgorithm;
use chrono::{DateTime, Duration, Utc};
use common::jwt::TokenClaims;
use common::secret::{clone_secret_bytes, SecretBox};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Published in the JWKS but not yet used for signing.
    Pending,
    /// The one key currently signing tokens.
    Active,
    /// No longer signing; verifiable until its retention window closes.
    Retired,
    /// Pulled from service immediately; rejected by verification.
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Pending => "pending",
            KeyStatus::Active => "active",
            KeyStatus::Retired => "retired",
            KeyStatus::Revoked => "revoked",
        }
    }
}

/// Public half of a key pair as base64url JWK parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum PublicComponent {
    /// Ed25519 key; `x` is the 32-byte public key.
    #[serde(rename = "OKP")]
    Ed25519 { x: String },
    /// P-256 key; `x` and `y` are the 32-byte affine coordinates.
    #[serde(rename = "EC")]
    P256 { x: String, y: String },
    /// RSA key; `n` and `e` are the unsigned big-endian modulus and exponent.
    #[serde(rename = "RSA")]
    Rsa { n: String, e: String },
}

impl PublicComponent {
    pub fn kty(&self) -> &'static str {
        match self {
            PublicComponent::Ed25519 { .. } => "OKP",
            PublicComponent::P256 { .. } => "EC",
            PublicComponent::Rsa { .. } => "RSA",
        }
    }

    /// Curve name; RSA keys have none.
    pub fn crv(&self) -> Option<&'static str> {
        match self {
            PublicComponent::Ed25519 { .. } => Some("Ed25519"),
            PublicComponent::P256 { .. } => Some("P-256"),
            PublicComponent::Rsa { .. } => None,
        }
    }
}

/// A signing key pair plus lifecycle metadata.
///
/// The private half is only present while the key is pending or active.
/// Status transitions return a new value; the store swaps it in whole.
pub struct KeyMaterial {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    pub public_component: PublicComponent,
    pub(crate) private_component: Option<SecretBox<Vec<u8>>>,
    pub created_at: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub status: KeyStatus,
}

impl KeyMaterial {
    /// A freshly generated or imported key, not yet signing.
    pub fn pending(
        key_id: String,
        algorithm: KeyAlgorithm,
        public_component: PublicComponent,
        private_der: SecretBox<Vec<u8>>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            key_id,
            algorithm,
            public_component,
            private_component: Some(private_der),
            created_at,
            not_before: created_at,
            retired_at: None,
            status: KeyStatus::Pending,
        }
    }

    pub(crate) fn activated(&self) -> Self {
        Self {
            status: KeyStatus::Active,
            retired_at: None,
            ..self.clone()
        }
    }

    /// Retirement drops the private half.
    pub(crate) fn retired(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: KeyStatus::Retired,
            retired_at: Some(at),
            private_component: None,
            ..self.clone()
        }
    }

    pub(crate) fn revoked(&self, at: DateTime<Utc>) -> Self {
        Self {
            status: KeyStatus::Revoked,
            retired_at: Some(self.retired_at.unwrap_or(at)),
            private_component: None,
            ..self.clone()
        }
    }

    pub(crate) fn private_der(&self) -> Option<&SecretBox<Vec<u8>>> {
        self.private_component.as_ref()
    }

    pub fn has_private_component(&self) -> bool {
        self.private_component.is_some()
    }

    /// Instant at which a retired key stops verifying.
    pub fn verifiable_until(&self, retention: Duration) -> Option<DateTime<Utc>> {
        match self.status {
            KeyStatus::Retired => self
                .retired_at
                .and_then(|at| at.checked_add_signed(retention)),
            _ => None,
        }
    }

    /// True once a retired key's retention window has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        self.status == KeyStatus::Retired
            && self
                .verifiable_until(retention)
                .is_some_and(|until| now >= until)
    }

    /// Active, or retired within retention.
    pub fn is_verifiable(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match self.status {
            KeyStatus::Active => true,
            KeyStatus::Retired => !self.is_expired(now, retention),
            KeyStatus::Pending | KeyStatus::Revoked => false,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
    }
}

impl Clone for KeyMaterial {
    fn clone(&self) -> Self {
        Self {
            key_id: self.key_id.clone(),
            algorithm: self.algorithm,
            public_component: self.public_component.clone(),
            private_component: self.private_component.as_ref().map(clone_secret_bytes),
            created_at: self.created_at,
            not_before: self.not_before,
            retired_at: self.retired_at,
            status: self.status,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("public_component", &self.public_component)
            .field(
                "private_component",
                &self.private_component.as_ref().map(|_| "[REDACTED]"),
            )
            .field("created_at", &self.created_at)
            .field("not_before", &self.not_before)
            .field("retired_at", &self.retired_at)
            .field("status", &self.status)
            .finish()
    }
}

/// JSON Web Key Set (RFC 7517).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<JsonWebKey>,
}

/// Public JWK entry. Field order is fixed so rendering is deterministic;
/// parameters a key type does not use are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKey {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use")]
    pub use_: String,
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub crv: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub e: Option<String>,
}

impl From<&KeyMaterial> for JsonWebKey {
    fn from(key: &KeyMaterial) -> Self {
        let mut jwk = JsonWebKey {
            kty: key.public_component.kty().to_string(),
            kid: key.key_id.clone(),
            use_: "sig".to_string(),
            alg: key.algorithm.as_str().to_string(),
            crv: key.public_component.crv().map(str::to_string),
            x: None,
            y: None,
            n: None,
            e: None,
        };

        match &key.public_component {
            PublicComponent::Ed25519 { x } => jwk.x = Some(x.clone()),
            PublicComponent::P256 { x, y } => {
                jwk.x = Some(x.clone());
                jwk.y = Some(y.clone());
            }
            PublicComponent::Rsa { n, e } => {
                jwk.n = Some(n.clone());
                jwk.e = Some(e.clone());
            }
        }

        jwk
    }
}

/// Body of `POST /api/v1/tokens`.
#[derive(Clone, Deserialize)]
pub struct IssueTokenRequest {
    pub sub: String,
}

impl fmt::Debug for IssueTokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssueTokenRequest")
            .field("sub", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub key_id: String,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Body of a successful `GET /api/v1/ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub ok: bool,
    pub message: String,
    pub now: i64,
    pub kid: String,
    pub claims: TokenClaims,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_key_id: Option<String>,
    pub published_keys: usize,
}
