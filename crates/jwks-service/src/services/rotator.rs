//! Key rotation state machine.
//!
//! One rotation cycle walks `Idle → Generating → Promoting → Retiring → Idle`.
//! The rotator is the only writer of the [`KeyStore`] in production; it runs
//! on a single background task and is cancelled between steps only.
//!
//! # Failure handling
//!
//! - Generation failure aborts the cycle with the store untouched
//! - Promotion failure keeps the old key active; it is only retired by the
//!   promotion swap itself
//! - Errors surface from [`Rotator::advance`]; [`Rotator::run`] logs them
//!   and backs off exponentially

use crate::config::Config;
use crate::crypto::{generate_key_pair, GeneratedKey, KeyAlgorithm};
use crate::errors::KeyError;
use crate::keystore::KeyStore;
use crate::models::KeyMaterial;
use crate::observability::metrics;
use crate::repositories::KeyFileRepository;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Backoff after the first failed tick.
pub const INITIAL_BACKOFF: std::time::Duration = std::time::Duration::from_secs(1);

/// Backoff ceiling.
pub const MAX_BACKOFF: std::time::Duration = std::time::Duration::from_secs(60);

/// Upper bound on state transitions taken in one tick.
const MAX_STEPS_PER_TICK: usize = 4;

/// Source of fresh key pairs.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self, algorithm: KeyAlgorithm) -> Result<GeneratedKey, KeyError>;
}

/// Generates keys with the system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKeyGenerator;

impl KeyGenerator for SystemKeyGenerator {
    fn generate(&self, algorithm: KeyAlgorithm) -> Result<GeneratedKey, KeyError> {
        generate_key_pair(algorithm)
    }
}

/// When to rotate and how long to overlap.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    pub rotation_interval: Duration,
    pub overlap_delay: Duration,
    pub check_interval: std::time::Duration,
    pub algorithm: KeyAlgorithm,
}

impl RotationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rotation_interval: config.rotation_interval(),
            overlap_delay: config.overlap_delay(),
            check_interval: config.rotation_check_interval(),
            algorithm: config.key_algorithm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationPhase {
    /// Waiting for the active key to age past the rotation interval.
    Idle,
    /// About to mint the next key.
    Generating,
    /// Pending key published, waiting out the overlap delay.
    Promoting {
        pending_key_id: String,
        published_at: DateTime<Utc>,
    },
    /// Previous key demoted by the promotion; confirming retirement.
    Retiring { retired_key_id: String },
}

impl RotationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationPhase::Idle => "idle",
            RotationPhase::Generating => "generating",
            RotationPhase::Promoting { .. } => "promoting",
            RotationPhase::Retiring { .. } => "retiring",
        }
    }
}

pub struct Rotator {
    store: Arc<KeyStore>,
    policy: RotationPolicy,
    generator: Arc<dyn KeyGenerator>,
    repository: Option<KeyFileRepository>,
    phase: RotationPhase,
    persisted_version: u64,
}

impl Rotator {
    pub fn new(
        store: Arc<KeyStore>,
        policy: RotationPolicy,
        generator: Arc<dyn KeyGenerator>,
        repository: Option<KeyFileRepository>,
    ) -> Self {
        let persisted_version = store.version();
        Self {
            store,
            policy,
            generator,
            repository,
            phase: RotationPhase::Idle,
            persisted_version,
        }
    }

    pub fn phase(&self) -> &RotationPhase {
        &self.phase
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    /// Make sure a signing key exists before the server starts.
    ///
    /// Resumes a persisted rotation when the store already has an active
    /// key. Otherwise promotes a lone pending key, or installs `initial`
    /// (an imported key) or a freshly generated one.
    ///
    /// # Errors
    ///
    /// Any error here is fatal to startup.
    #[instrument(skip_all, name = "jwks.rotator.bootstrap")]
    pub async fn bootstrap(
        &mut self,
        now: DateTime<Utc>,
        initial: Option<KeyMaterial>,
    ) -> Result<(), KeyError> {
        let snapshot = self.store.snapshot();

        match (snapshot.active(), snapshot.pending()) {
            (Some(active), pending) => {
                if initial.is_some() {
                    warn!(
                        target: "jwks.rotator",
                        active_key_id = %active.key_id,
                        "Key store already has an active key, ignoring imported key"
                    );
                }
                if let Some(pending) = pending {
                    info!(
                        target: "jwks.rotator",
                        pending_key_id = %pending.key_id,
                        "Resuming rotation with pending key"
                    );
                    self.phase = RotationPhase::Promoting {
                        pending_key_id: pending.key_id.clone(),
                        published_at: pending.created_at,
                    };
                }
            }
            (None, Some(pending)) => {
                let pending_key_id = pending.key_id.clone();
                self.store.promote(&pending_key_id, now)?;
                info!(
                    target: "jwks.rotator",
                    key_id = %pending_key_id,
                    "Promoted pending key at startup"
                );
            }
            (None, None) => {
                let key = match initial {
                    Some(key) => {
                        info!(target: "jwks.rotator", key_id = %key.key_id, "Using imported signing key");
                        key
                    }
                    None => {
                        let key_id = new_key_id(now);
                        let generated = self.generator.generate(self.policy.algorithm)?;
                        info!(
                            target: "jwks.rotator",
                            key_id = %key_id,
                            algorithm = %self.policy.algorithm,
                            "Generated initial signing key"
                        );
                        generated.into_pending(key_id, self.policy.algorithm, now)
                    }
                };
                self.store.activate_initial_key(key)?;
            }
        }

        // The active key must exist from here on.
        self.store.current_active_key()?;
        self.persist().await?;
        self.update_gauges(now);
        Ok(())
    }

    /// Take as many state transitions as `now` allows, purge expired keys
    /// and persist the result.
    #[instrument(skip_all, fields(phase = self.phase.as_str()))]
    pub async fn advance(&mut self, now: DateTime<Utc>) -> Result<(), KeyError> {
        let purged = self.store.purge_expired(now);
        if !purged.is_empty() {
            metrics::record_keys_purged(purged.len());
            info!(target: "jwks.rotator", purged = ?purged, "Purged expired keys");
        }

        let mut outcome = Ok(());
        for _ in 0..MAX_STEPS_PER_TICK {
            match self.step(now) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        // Store mutations that did happen are persisted even on error.
        if self.store.version() != self.persisted_version {
            self.persist().await?;
        }
        self.update_gauges(now);
        outcome
    }

    /// Run one state transition. Returns whether the phase moved.
    pub fn step(&mut self, now: DateTime<Utc>) -> Result<bool, KeyError> {
        match self.phase.clone() {
            RotationPhase::Idle => {
                let snapshot = self.store.snapshot();
                if let Some(pending) = snapshot.pending() {
                    self.phase = RotationPhase::Promoting {
                        pending_key_id: pending.key_id.clone(),
                        published_at: pending.created_at,
                    };
                    return Ok(true);
                }

                let active = snapshot.active().ok_or(KeyError::NoActiveKey)?;
                if active.age(now) >= self.policy.rotation_interval {
                    debug!(
                        target: "jwks.rotator",
                        key_id = %active.key_id,
                        "Active key reached rotation interval"
                    );
                    self.phase = RotationPhase::Generating;
                    return Ok(true);
                }
                Ok(false)
            }
            RotationPhase::Generating => {
                let key_id = new_key_id(now);
                let generated = match self.generator.generate(self.policy.algorithm) {
                    Ok(generated) => generated,
                    Err(e) => {
                        self.phase = RotationPhase::Idle;
                        metrics::record_key_rotation("error");
                        return Err(e);
                    }
                };

                let key = generated.into_pending(key_id.clone(), self.policy.algorithm, now);
                if let Err(e) = self.store.insert_pending_key(key) {
                    self.phase = RotationPhase::Idle;
                    metrics::record_key_rotation("error");
                    return Err(e);
                }

                info!(target: "jwks.rotator", key_id = %key_id, "Pending key published");
                metrics::record_key_rotation("generated");
                self.phase = RotationPhase::Promoting {
                    pending_key_id: key_id,
                    published_at: now,
                };
                Ok(true)
            }
            RotationPhase::Promoting {
                pending_key_id,
                published_at,
            } => {
                if now < published_at + self.policy.overlap_delay {
                    return Ok(false);
                }

                match self.store.promote(&pending_key_id, now) {
                    Ok(promotion) => {
                        metrics::record_key_rotation("promoted");
                        self.phase = match promotion.demoted {
                            Some(retired_key_id) => RotationPhase::Retiring { retired_key_id },
                            None => RotationPhase::Idle,
                        };
                        Ok(true)
                    }
                    Err(e @ (KeyError::KeyNotFound(_) | KeyError::InvalidTransition(_))) => {
                        // The pending key is gone; start over.
                        self.phase = RotationPhase::Idle;
                        metrics::record_key_rotation("error");
                        Err(e)
                    }
                    Err(e) => {
                        metrics::record_key_rotation("error");
                        Err(e)
                    }
                }
            }
            RotationPhase::Retiring { retired_key_id } => {
                let result = match self.store.retire(&retired_key_id, now) {
                    Ok(()) | Err(KeyError::KeyNotFound(_)) => Ok(true),
                    Err(e) => Err(e),
                };
                self.phase = RotationPhase::Idle;

                if result.is_ok() {
                    info!(
                        target: "jwks.rotator",
                        key_id = %retired_key_id,
                        "Rotation complete, previous key retired"
                    );
                    metrics::record_key_rotation("completed");
                }
                result
            }
        }
    }

    /// Drive the state machine until `cancel_token` fires.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        info!(
            target: "jwks.rotator",
            interval_seconds = self.policy.rotation_interval.num_seconds(),
            overlap_seconds = self.policy.overlap_delay.num_seconds(),
            "Key rotator started"
        );

        let mut backoff = INITIAL_BACKOFF;
        loop {
            let delay = match self.advance(Utc::now()).await {
                Ok(()) => {
                    backoff = INITIAL_BACKOFF;
                    self.policy.check_interval
                }
                Err(e) => {
                    error!(
                        target: "jwks.rotator",
                        error = %e,
                        phase = self.phase.as_str(),
                        retry_in_ms = backoff.as_millis() as u64,
                        "Rotation step failed"
                    );
                    let delay = backoff;
                    backoff = next_backoff(backoff);
                    delay
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel_token.cancelled() => {
                    info!(target: "jwks.rotator", "Key rotator received shutdown signal, exiting");
                    break;
                }
            }
        }
    }

    async fn persist(&mut self) -> Result<(), KeyError> {
        let snapshot = self.store.snapshot();
        if let Some(repository) = &self.repository {
            repository.save(&snapshot).await?;
        }
        self.persisted_version = snapshot.version();
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_gauges(&self, now: DateTime<Utc>) {
        let snapshot = self.store.snapshot();
        metrics::set_store_version(snapshot.version());
        metrics::set_published_keys(snapshot.published(now, self.store.retention()).len());
        if let Some(active) = snapshot.active() {
            metrics::set_signing_key_age_seconds(active.age(now).num_milliseconds() as f64 / 1000.0);
        }
    }
}

pub fn next_backoff(current: std::time::Duration) -> std::time::Duration {
    current.saturating_mul(2).min(MAX_BACKOFF)
}

/// Date-prefixed random id, e.g. `20261016-3f2a...`.
fn new_key_id(now: DateTime<Utc>) -> String {
    format!("{}-{}", now.format("%Y%m%d"), Uuid::new_v4().simple())
}
