//! Integration tests for key rotation.
//!
//! HTTP tests rotate through the store at wall-clock time. Scenario tests
//! drive a rotator on a simulated clock.

use chrono::Duration;
use jwks_service::errors::KeyError;
use jwks_service::models::KeyStatus;
use jwks_service::services::{SigningService, TokenSettings, VerificationService};
use jwks_test_utils::*;
use reqwest::StatusCode;
use std::sync::Arc;

fn hour_long_tokens() -> TokenSettings {
    TokenSettings {
        issuer: TEST_ISSUER.to_string(),
        audience: TEST_AUDIENCE.to_string(),
        token_lifetime: Duration::hours(1),
        leeway: std::time::Duration::from_secs(2),
        clock_skew: std::time::Duration::from_secs(300),
    }
}

/// Tokens signed before a rotation still validate after it.
#[tokio::test]
async fn test_old_token_valid_after_rotation() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestJwksServer::spawn().await?;
    let old_kid = server.store().current_active_key()?.key_id.clone();
    let old_token = server.issue_token(TEST_SUBJECT_ALICE).await?;

    // Act
    let promotion = server.rotate_keys()?;
    let new_token = server.issue_token(TEST_SUBJECT_ALICE).await?;

    // Assert
    assert_eq!(promotion.demoted.as_deref(), Some(old_kid.as_str()));
    new_token.assert_signed_by(&promotion.promoted);
    old_token.assert_signed_by(&old_kid);

    assert_eq!(server.ping(&old_token).await?.status(), StatusCode::OK);
    assert_eq!(server.ping(&new_token).await?.status(), StatusCode::OK);

    server
        .fetch_jwks()
        .await?
        .assert_key_count(2)
        .assert_has_kid(&old_kid)
        .assert_has_kid(&promotion.promoted);

    Ok(())
}

/// A revoked key disappears from the JWKS and its tokens stop validating.
#[tokio::test]
async fn test_revoked_key_unpublished() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;
    let old_kid = server.store().current_active_key()?.key_id.clone();
    let old_token = server.issue_token(TEST_SUBJECT_BOB).await?;
    server.rotate_keys()?;

    server.store().revoke(&old_kid, chrono::Utc::now())?;

    server.fetch_jwks().await?.assert_key_count(1).assert_lacks_kid(&old_kid);
    assert_eq!(
        server.ping(&old_token).await?.status(),
        StatusCode::UNAUTHORIZED
    );

    Ok(())
}

/// Full scenario: 24h interval, 5m overlap, 70m retention.
#[tokio::test]
async fn test_rotation_scenario_timeline() -> Result<(), anyhow::Error> {
    // Arrange
    let (store, mut rotator) = scenario_rotator();
    let mut clock = TestClock::start();
    rotator.bootstrap(clock.now(), None).await?;
    let k1 = store.current_active_key()?.key_id.clone();

    let signer = SigningService::new(Arc::clone(&store), hour_long_tokens());
    let verifier = VerificationService::new(Arc::clone(&store), hour_long_tokens());

    // Act: rotation interval elapses, K2 is published but does not sign.
    rotator
        .advance(clock.advance(Duration::hours(SCENARIO_ROTATION_INTERVAL_HOURS)))
        .await?;
    let k2 = store
        .snapshot()
        .pending()
        .map(|k| k.key_id.clone())
        .ok_or_else(|| anyhow::anyhow!("no pending key after interval"))?;
    assert_eq!(store.published_keys(clock.now()).len(), 2);
    let old = signer.issue_token(TEST_SUBJECT_ALICE, clock.now())?;
    assert_eq!(old.key_id, k1);

    // Overlap elapses, K2 takes over.
    let promoted_at = clock.advance(Duration::minutes(SCENARIO_OVERLAP_MINUTES));
    rotator.advance(promoted_at).await?;
    assert_eq!(store.current_active_key()?.key_id, k2);
    let new = signer.issue_token(TEST_SUBJECT_ALICE, promoted_at)?;
    assert_eq!(new.key_id, k2);

    // Assert: K1 verifies for the whole retention window.
    assert!(verifier.verify(&old.token, promoted_at + Duration::minutes(50)).is_ok());
    let near_end = promoted_at + Duration::minutes(SCENARIO_RETENTION_MINUTES) - Duration::seconds(1);
    assert!(store
        .all_verifiable_keys(near_end)
        .iter()
        .any(|k| k.key_id == k1));

    let expiry = promoted_at + Duration::minutes(SCENARIO_RETENTION_MINUTES);
    assert!(matches!(
        verifier.verify(&old.token, expiry),
        Err(KeyError::ExpiredKey)
    ));

    rotator.advance(expiry).await?;
    assert!(store.snapshot().get(&k1).is_none());
    assert!(matches!(
        verifier.verify(&old.token, expiry),
        Err(KeyError::UnknownKey)
    ));
    assert!(verifier.verify(&new.token, expiry).is_err(), "new token outlived its exp");

    Ok(())
}

/// Several rotations in a row keep exactly one active key.
#[tokio::test]
async fn test_repeated_rotations_keep_one_active_key() -> Result<(), anyhow::Error> {
    let (store, mut rotator) = scenario_rotator();
    let mut clock = TestClock::start();
    rotator.bootstrap(clock.now(), None).await?;

    let mut seen = vec![store.current_active_key()?.key_id.clone()];
    for _ in 0..4 {
        run_one_rotation(&mut rotator, &mut clock).await?;

        let snapshot = store.snapshot();
        let active: Vec<_> = snapshot
            .keys()
            .iter()
            .filter(|k| k.status == KeyStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);

        let active_id = store.current_active_key()?.key_id.clone();
        assert!(!seen.contains(&active_id), "key id reused: {active_id}");
        seen.push(active_id);
    }

    // Retention is far shorter than the interval, so only the active key
    // remains once the next interval has elapsed.
    let later = clock.advance(Duration::hours(2));
    rotator.advance(later).await?;
    assert_eq!(store.all_verifiable_keys(later).len(), 1);

    Ok(())
}

/// Purging with nothing to purge leaves the store untouched.
#[tokio::test]
async fn test_purge_with_only_active_key_is_noop() -> Result<(), anyhow::Error> {
    let (store, mut rotator) = scenario_rotator();
    let clock = TestClock::start();
    rotator.bootstrap(clock.now(), None).await?;
    let version = store.version();

    let purged = store.purge_expired(clock.now() + Duration::days(30));

    assert!(purged.is_empty());
    assert_eq!(store.version(), version);
    assert!(store.current_active_key().is_ok());

    Ok(())
}

/// A seeded initial key is used as-is and rotated away normally.
#[tokio::test]
async fn test_imported_key_rotates_out() -> Result<(), anyhow::Error> {
    let (store, mut rotator) = scenario_rotator();
    let mut clock = TestClock::start();
    let imported = test_signing_key(TEST_SEED_1, TEST_KEY_ID_1, clock.now())?;
    rotator.bootstrap(clock.now(), Some(imported)).await?;
    assert_eq!(store.current_active_key()?.key_id, TEST_KEY_ID_1);

    let promoted_at = run_one_rotation(&mut rotator, &mut clock).await?;

    assert_ne!(store.current_active_key()?.key_id, TEST_KEY_ID_1);
    let retired = store
        .snapshot()
        .get(TEST_KEY_ID_1)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("imported key vanished"))?;
    assert_eq!(retired.status, KeyStatus::Retired);
    assert_eq!(retired.retired_at, Some(promoted_at));

    Ok(())
}
