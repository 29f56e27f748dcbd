//! Token verification against every still-valid key.

use crate::crypto::verify_jwt;
use crate::errors::KeyError;
use crate::keystore::KeyStore;
use crate::models::KeyStatus;
use crate::observability::metrics;
use crate::services::signing_service::TokenSettings;
use chrono::{DateTime, Utc};
use common::jwt::{extract_kid, validate_iat_at, validate_time_window, JwtValidationError, TokenClaims};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Claims of a verified token and the key that verified it.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub key_id: String,
    pub claims: TokenClaims,
}

pub struct VerificationService {
    store: Arc<KeyStore>,
    settings: TokenSettings,
}

impl VerificationService {
    pub fn new(store: Arc<KeyStore>, settings: TokenSettings) -> Self {
        Self { store, settings }
    }

    /// Verify `token` at `now` and return its claims.
    ///
    /// # Errors
    ///
    /// - `UnknownKey`: no `kid`, or the kid is unknown, pending or purged
    /// - `RevokedKey`: the kid was revoked
    /// - `ExpiredKey`: the kid was retired longer than the retention window
    /// - `SignatureMismatch`: the signature does not check out
    /// - `InvalidClaims`: malformed token, or `exp`/`nbf`/`iat`/`iss`/`aud`
    ///   rejected
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<TokenClaims, KeyError> {
        self.verify_token(token, now).map(|verified| verified.claims)
    }

    /// Like [`Self::verify`], also returning the verifying key id.
    #[instrument(skip_all)]
    pub fn verify_token(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken, KeyError> {
        let result = self.check(token, now);
        match &result {
            Ok(_) => metrics::record_token_validation("success", None),
            Err(e) => metrics::record_token_validation("error", Some(e.category())),
        }
        result
    }

    fn check(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken, KeyError> {
        let kid = extract_kid(token).map_err(|e| {
            debug!(target: "jwks.verify", error = ?e, "Token header rejected");
            match e {
                JwtValidationError::MissingKid => KeyError::UnknownKey,
                other => KeyError::InvalidClaims(format!("{other:?}")),
            }
        })?;

        let snapshot = self.store.snapshot();
        let retention = self.store.retention();
        let key = match snapshot.get(&kid) {
            None => Err(KeyError::UnknownKey),
            Some(key) => match key.status {
                KeyStatus::Pending => Err(KeyError::UnknownKey),
                KeyStatus::Revoked => Err(KeyError::RevokedKey),
                KeyStatus::Retired if key.is_expired(now, retention) => Err(KeyError::ExpiredKey),
                KeyStatus::Active | KeyStatus::Retired => Ok(key),
            },
        }
        .map_err(|e| {
            match e {
                KeyError::RevokedKey => {
                    warn!(target: "jwks.verify", kid = %kid, error = %e, "Token key rejected")
                }
                _ => info!(target: "jwks.verify", kid = %kid, error = %e, "Token key rejected"),
            }
            e
        })?;

        let claims = verify_jwt(token, key, &self.settings.issuer, &self.settings.audience)
            .map_err(|e| {
                match e {
                    KeyError::SignatureMismatch => {
                        warn!(target: "jwks.verify", kid = %kid, error = %e, "Token signature rejected")
                    }
                    _ => debug!(target: "jwks.verify", kid = %kid, error = %e, "Token claims rejected"),
                }
                e
            })?;

        let now_ts = now.timestamp();
        validate_time_window(&claims, self.settings.leeway, now_ts)
            .and_then(|()| validate_iat_at(claims.iat, self.settings.clock_skew, now_ts))
            .map_err(|e| {
                debug!(target: "jwks.verify", kid = %kid, error = ?e, "Token time claims rejected");
                KeyError::InvalidClaims(format!("{e:?}"))
            })?;

        debug!(target: "jwks.verify", kid = %kid, "Token verified");
        Ok(VerifiedToken {
            key_id: kid,
            claims,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::crypto::{ed25519_key_from_seed, generate_key_pair, KeyAlgorithm};
    use crate::services::signing_service::SigningService;
    use chrono::{Duration, TimeZone};
    use common::jwt::encode_b64url;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).unwrap()
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

    struct Fixture {
        store: Arc<KeyStore>,
        signer: SigningService,
        verifier: VerificationService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(KeyStore::new(Duration::minutes(70)));
        let key = ed25519_key_from_seed(&[1; 32], None).unwrap().into_pending(
            "k1".to_string(),
            KeyAlgorithm::EdDsa,
            t0(),
        );
        store.activate_initial_key(key).unwrap();
        Fixture {
            signer: SigningService::new(Arc::clone(&store), settings()),
            verifier: VerificationService::new(Arc::clone(&store), settings()),
            store,
        }
    }

    fn rotate(store: &KeyStore, seed: u8, key_id: &str, at: DateTime<Utc>) {
        let key = ed25519_key_from_seed(&[seed; 32], None).unwrap().into_pending(
            key_id.to_string(),
            KeyAlgorithm::EdDsa,
            at,
        );
        store.insert_pending_key(key).unwrap();
        store.promote(key_id, at).unwrap();
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let f = fixture();
        let signed = f.signer.issue_token("uid-7", t0()).unwrap();

        let verified = f
            .verifier
            .verify_token(&signed.token, t0() + Duration::seconds(5))
            .unwrap();
        assert_eq!(verified.key_id, "k1");
        assert_eq!(verified.claims.sub, "uid-7");
    }

    #[test]
    fn test_retired_key_verifies_within_retention() {
        let f = fixture();
        let signed = f.signer.issue_token("uid-7", t0()).unwrap();
        rotate(&f.store, 2, "k2", t0() + Duration::seconds(1));

        // Key lookup succeeds for the whole window; only exp fails.
        let later = t0() + Duration::minutes(69);
        let result = f.verifier.verify(&signed.token, later);
        assert!(matches!(result, Err(KeyError::InvalidClaims(_))));

        let within_exp = t0() + Duration::seconds(20);
        assert!(f.verifier.verify(&signed.token, within_exp).is_ok());
    }

    #[test]
    fn test_retired_key_past_retention_is_expired() {
        let f = fixture();
        let signed = f.signer.issue_token("uid-7", t0()).unwrap();
        let retired_at = t0() + Duration::seconds(1);
        rotate(&f.store, 2, "k2", retired_at);

        let result = f.verifier.verify(&signed.token, retired_at + Duration::minutes(70));
        assert!(matches!(result, Err(KeyError::ExpiredKey)));

        f.store.purge_expired(retired_at + Duration::minutes(70));
        let result = f.verifier.verify(&signed.token, retired_at + Duration::minutes(70));
        assert!(matches!(result, Err(KeyError::UnknownKey)));
    }

    #[test]
    fn test_revoked_key_rejected() {
        let f = fixture();
        let signed = f.signer.issue_token("uid-7", t0()).unwrap();
        rotate(&f.store, 2, "k2", t0() + Duration::seconds(1));
        f.store.revoke("k1", t0() + Duration::seconds(2)).unwrap();

        let result = f.verifier.verify(&signed.token, t0() + Duration::seconds(3));
        assert!(matches!(result, Err(KeyError::RevokedKey)));
    }

    #[test]
    fn test_pending_key_is_unknown() {
        let f = fixture();
        let pending = ed25519_key_from_seed(&[2; 32], None).unwrap().into_pending(
            "k2".to_string(),
            KeyAlgorithm::EdDsa,
            t0(),
        );
        f.store.insert_pending_key(pending).unwrap();

        // Sign directly with the pending key to simulate a forged kid.
        let pending = f.store.snapshot().pending().cloned().unwrap();
        let claims = f.signer.issue_token("uid-1", t0()).unwrap().claims;
        let token = crate::crypto::sign_jwt(
            &claims,
            KeyAlgorithm::EdDsa,
            pending.private_der().unwrap(),
            "k2",
        )
        .unwrap();

        assert!(matches!(f.verifier.verify(&token, t0()), Err(KeyError::UnknownKey)));
    }

    #[test]
    fn test_unknown_kid_rejected() {
        let f = fixture();
        let stranger = generate_key_pair(KeyAlgorithm::EdDsa).unwrap().into_pending(
            "stranger".to_string(),
            KeyAlgorithm::EdDsa,
            t0(),
        );
        let claims = f.signer.issue_token("uid-1", t0()).unwrap().claims;
        let token = crate::crypto::sign_jwt(
            &claims,
            KeyAlgorithm::EdDsa,
            stranger.private_der().unwrap(),
            "stranger",
        )
        .unwrap();

        assert!(matches!(f.verifier.verify(&token, t0()), Err(KeyError::UnknownKey)));
    }

    #[test]
    fn test_wrong_key_under_known_kid_is_signature_mismatch() {
        let f = fixture();
        let other = generate_key_pair(KeyAlgorithm::EdDsa).unwrap().into_pending(
            "other".to_string(),
            KeyAlgorithm::EdDsa,
            t0(),
        );
        let claims = f.signer.issue_token("uid-1", t0()).unwrap().claims;
        let forged = crate::crypto::sign_jwt(
            &claims,
            KeyAlgorithm::EdDsa,
            other.private_der().unwrap(),
            "k1",
        )
        .unwrap();

        assert!(matches!(
            f.verifier.verify(&forged, t0()),
            Err(KeyError::SignatureMismatch)
        ));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` with an INFO-level subscriber and return what it logged.
    fn logs_at_info<T>(f: impl FnOnce() -> T) -> (T, String) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();

        let out = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        (out, text)
    }

    #[test]
    fn test_key_rejections_are_logged_with_kid() {
        let f = fixture();
        let signed = f.signer.issue_token("uid-7", t0()).unwrap();
        let retired_at = t0() + Duration::seconds(1);
        rotate(&f.store, 2, "k2", retired_at);

        let (expired, logs) =
            logs_at_info(|| f.verifier.verify(&signed.token, retired_at + Duration::minutes(70)));
        assert!(matches!(expired, Err(KeyError::ExpiredKey)));
        assert!(logs.contains("INFO"), "{logs}");
        assert!(logs.contains("kid=k1"), "{logs}");

        f.store.revoke("k1", retired_at + Duration::seconds(1)).unwrap();
        let (revoked, logs) =
            logs_at_info(|| f.verifier.verify(&signed.token, retired_at + Duration::seconds(2)));
        assert!(matches!(revoked, Err(KeyError::RevokedKey)));
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("kid=k1"), "{logs}");
    }

    #[test]
    fn test_signature_mismatch_is_logged_as_warning() {
        let f = fixture();
        let other = generate_key_pair(KeyAlgorithm::EdDsa).unwrap().into_pending(
            "other".to_string(),
            KeyAlgorithm::EdDsa,
            t0(),
        );
        let claims = f.signer.issue_token("uid-1", t0()).unwrap().claims;
        let forged = crate::crypto::sign_jwt(
            &claims,
            KeyAlgorithm::EdDsa,
            other.private_der().unwrap(),
            "k1",
        )
        .unwrap();

        let (result, logs) = logs_at_info(|| f.verifier.verify(&forged, t0()));
        assert!(matches!(result, Err(KeyError::SignatureMismatch)));
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("kid=k1"), "{logs}");
        assert!(logs.contains("Token signature rejected"), "{logs}");
    }

    #[test]
    fn test_missing_kid_is_unknown_key() {
        let f = fixture();
        let header = encode_b64url(br#"{"alg":"EdDSA","typ":"JWT"}"#);
        let token = format!("{header}.e30.c2ln");

        assert!(matches!(f.verifier.verify(&token, t0()), Err(KeyError::UnknownKey)));
    }

    #[test]
    fn test_malformed_token_is_invalid_claims() {
        let f = fixture();
        assert!(matches!(
            f.verifier.verify("not-a-jwt", t0()),
            Err(KeyError::InvalidClaims(_))
        ));
        let oversized = "a".repeat(10_000);
        assert!(matches!(
            f.verifier.verify(&oversized, t0()),
            Err(KeyError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_expired_and_future_tokens_rejected() {
        let f = fixture();
        let signed = f.signer.issue_token("uid-1", t0()).unwrap();

        // exp = iat + 30, leeway 2: rejected from iat + 32.
        assert!(f.verifier.verify(&signed.token, t0() + Duration::seconds(31)).is_ok());
        assert!(matches!(
            f.verifier.verify(&signed.token, t0() + Duration::seconds(32)),
            Err(KeyError::InvalidClaims(_))
        ));

        // nbf = iat - 2, leeway 2: accepted from iat - 4.
        assert!(f.verifier.verify(&signed.token, t0() - Duration::seconds(4)).is_ok());
        assert!(matches!(
            f.verifier.verify(&signed.token, t0() - Duration::seconds(5)),
            Err(KeyError::InvalidClaims(_))
        ));
    }

    #[test]
    fn test_wrong_audience_rejected() {
        let f = fixture();
        let other_settings = TokenSettings {
            audience: "someone-else".to_string(),
            ..settings()
        };
        let signer = SigningService::new(Arc::clone(&f.store), other_settings);
        let signed = signer.issue_token("uid-1", t0()).unwrap();

        assert!(matches!(
            f.verifier.verify(&signed.token, t0()),
            Err(KeyError::InvalidClaims(_))
        ));
    }
}
