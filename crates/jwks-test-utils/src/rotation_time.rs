//! Time helpers for key rotation tests
//!
//! The rotator and key store take `now` explicitly, so rotation scenarios
//! run against a fixed clock instead of sleeping.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jwks_service::crypto::KeyAlgorithm;
use jwks_service::keystore::KeyStore;
use jwks_service::services::{RotationPolicy, Rotator, SystemKeyGenerator};
use std::sync::Arc;

/// Rotation interval of the reference scenario.
pub const SCENARIO_ROTATION_INTERVAL_HOURS: i64 = 24;

/// Overlap delay of the reference scenario.
pub const SCENARIO_OVERLAP_MINUTES: i64 = 5;

/// Retention of the reference scenario: 1h max token lifetime + 10m skew.
pub const SCENARIO_RETENTION_MINUTES: i64 = 70;

/// Manually advanced clock.
///
/// # Example
/// ```rust,ignore
/// let mut clock = TestClock::start();
/// rotator.bootstrap(clock.now(), None).await?;
/// rotator.advance(clock.advance(Duration::hours(24))).await?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestClock {
    now: DateTime<Utc>,
}

impl TestClock {
    /// Clock at 2026-01-01T00:00:00Z.
    pub fn start() -> Self {
        Self::at(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Move forward by `by` and return the new time.
    pub fn advance(&mut self, by: Duration) -> DateTime<Utc> {
        self.now += by;
        self.now
    }
}

/// 24h interval, 5m overlap, EdDSA, 5s tick.
pub fn scenario_policy() -> RotationPolicy {
    RotationPolicy {
        rotation_interval: Duration::hours(SCENARIO_ROTATION_INTERVAL_HOURS),
        overlap_delay: Duration::minutes(SCENARIO_OVERLAP_MINUTES),
        check_interval: std::time::Duration::from_secs(5),
        algorithm: KeyAlgorithm::EdDsa,
    }
}

pub fn scenario_retention() -> Duration {
    Duration::minutes(SCENARIO_RETENTION_MINUTES)
}

/// Empty store plus an in-memory rotator using the scenario policy.
pub fn scenario_rotator() -> (Arc<KeyStore>, Rotator) {
    let store = Arc::new(KeyStore::new(scenario_retention()));
    let rotator = Rotator::new(
        Arc::clone(&store),
        scenario_policy(),
        Arc::new(SystemKeyGenerator),
        None,
    );
    (store, rotator)
}

/// Drive `rotator` through one full rotation starting at `clock`.
///
/// Returns the promotion instant, which is the old key's `retired_at`.
pub async fn run_one_rotation(
    rotator: &mut Rotator,
    clock: &mut TestClock,
) -> Result<DateTime<Utc>, anyhow::Error> {
    let policy = rotator.policy().clone();
    rotator.advance(clock.advance(policy.rotation_interval)).await?;
    let promoted_at = clock.advance(policy.overlap_delay);
    rotator.advance(promoted_at).await?;
    Ok(promoted_at)
}
