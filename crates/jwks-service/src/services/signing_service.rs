//! Token signing with the current active key.

use crate::config::Config;
use crate::crypto::sign_jwt;
use crate::errors::KeyError;
use crate::keystore::KeyStore;
use crate::observability::metrics;
use chrono::{DateTime, Duration, Utc};
use common::jwt::TokenClaims;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Claim and timing settings shared by signing and verification.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub issuer: String,
    pub audience: String,
    pub token_lifetime: Duration,
    pub leeway: std::time::Duration,
    pub clock_skew: std::time::Duration,
}

impl TokenSettings {
    #[allow(clippy::cast_possible_wrap)]
    pub fn from_config(config: &Config) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            // Bounded at config load.
            token_lifetime: Duration::seconds(config.token_lifetime_seconds as i64),
            leeway: std::time::Duration::from_secs(config.leeway_seconds),
            clock_skew: std::time::Duration::from_secs(config.jwt_clock_skew_seconds),
        }
    }
}

/// A signed JWT and the key that signed it.
#[derive(Clone)]
pub struct SignedToken {
    pub token: String,
    pub key_id: String,
    pub claims: TokenClaims,
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedToken")
            .field("token", &"[REDACTED]")
            .field("key_id", &self.key_id)
            .field("claims", &self.claims)
            .finish()
    }
}

pub struct SigningService {
    store: Arc<KeyStore>,
    settings: TokenSettings,
}

impl SigningService {
    pub fn new(store: Arc<KeyStore>, settings: TokenSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Sign `claims` with the active key.
    ///
    /// # Errors
    ///
    /// - `NoActiveKey` when the store has no active key
    /// - `Signing` when the key is not yet valid at `claims.iat` or the
    ///   signature cannot be produced
    #[instrument(skip_all)]
    pub fn sign(&self, claims: &TokenClaims) -> Result<SignedToken, KeyError> {
        let key = self.store.current_active_key()?;

        if key.not_before.timestamp() > claims.iat {
            return Err(KeyError::Signing(format!(
                "Key {} is not valid before iat {}",
                key.key_id, claims.iat
            )));
        }

        let private = key.private_der().ok_or_else(|| {
            KeyError::Signing(format!("Key {} has no private component", key.key_id))
        })?;
        let token = sign_jwt(claims, key.algorithm, private, &key.key_id)?;

        debug!(target: "jwks.sign", key_id = %key.key_id, "Token signed");
        Ok(SignedToken {
            token,
            key_id: key.key_id.clone(),
            claims: claims.clone(),
        })
    }

    /// Build standard claims for `subject` at `now` and sign them.
    #[instrument(skip_all)]
    pub fn issue_token(&self, subject: &str, now: DateTime<Utc>) -> Result<SignedToken, KeyError> {
        let start = Instant::now();

        #[allow(clippy::cast_possible_wrap)]
        let leeway = self.settings.leeway.as_secs() as i64;
        let iat = now.timestamp();
        let claims = TokenClaims {
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            sub: subject.to_string(),
            iat,
            nbf: iat - leeway,
            exp: iat + self.settings.token_lifetime.num_seconds(),
            jti: Uuid::new_v4().simple().to_string(),
        };

        let result = self.sign(&claims);
        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_token_issuance(status, start.elapsed());
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crypto::{ed25519_key_from_seed, verify_jwt, KeyAlgorithm};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()
    }

    fn settings() -> TokenSettings {
        TokenSettings {
            issuer: "JWT API Simulation".to_string(),
            audience: "JWT API Simulation".to_string(),
            token_lifetime: Duration::seconds(30),
            leeway: std::time::Duration::from_secs(2),
            clock_skew: std::time::Duration::from_secs(300),
        }
    }

    fn service_with_key(created_at: DateTime<Utc>) -> (Arc<KeyStore>, SigningService) {
        let store = Arc::new(KeyStore::new(Duration::hours(1)));
        let key = ed25519_key_from_seed(&[4; 32], None).unwrap().into_pending(
            "k1".to_string(),
            KeyAlgorithm::EdDsa,
            created_at,
        );
        store.activate_initial_key(key).unwrap();
        let service = SigningService::new(Arc::clone(&store), settings());
        (store, service)
    }

    #[test]
    fn test_issue_token_builds_standard_claims() {
        let (_store, service) = service_with_key(t0());
        let now = t0() + Duration::seconds(10);

        let signed = service.issue_token("uid-42", now).unwrap();

        assert_eq!(signed.key_id, "k1");
        let claims = &signed.claims;
        assert_eq!(claims.iss, "JWT API Simulation");
        assert_eq!(claims.aud, "JWT API Simulation");
        assert_eq!(claims.sub, "uid-42");
        assert_eq!(claims.iat, now.timestamp());
        assert_eq!(claims.nbf, now.timestamp() - 2);
        assert_eq!(claims.exp, now.timestamp() + 30);
        assert_eq!(claims.jti.len(), 32);
    }

    #[test]
    fn test_signed_token_verifies_with_active_key() {
        let (store, service) = service_with_key(t0());
        let signed = service.issue_token("uid-1", t0()).unwrap();

        let key = store.current_active_key().unwrap();
        let claims =
            verify_jwt(&signed.token, &key, "JWT API Simulation", "JWT API Simulation").unwrap();
        assert_eq!(claims, signed.claims);
    }

    #[test]
    fn test_sign_without_active_key_fails() {
        let service = SigningService::new(Arc::new(KeyStore::new(Duration::hours(1))), settings());
        assert!(matches!(
            service.issue_token("uid-1", t0()),
            Err(KeyError::NoActiveKey)
        ));
    }

    #[test]
    fn test_sign_refuses_iat_before_key_not_before() {
        let (_store, service) = service_with_key(t0());
        let result = service.issue_token("uid-1", t0() - Duration::seconds(1));
        assert!(matches!(result, Err(KeyError::Signing(msg)) if msg.contains("not valid before")));
    }

    #[test]
    fn test_unique_jti_per_token() {
        let (_store, service) = service_with_key(t0());
        let a = service.issue_token("uid-1", t0()).unwrap();
        let b = service.issue_token("uid-1", t0()).unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
    }

    #[test]
    fn test_signed_token_debug_redacts_token() {
        let (_store, service) = service_with_key(t0());
        let signed = service.issue_token("uid-1", t0()).unwrap();
        let debug = format!("{signed:?}");
        assert!(!debug.contains(&signed.token));
        assert!(debug.contains("[REDACTED]"));
    }
}
