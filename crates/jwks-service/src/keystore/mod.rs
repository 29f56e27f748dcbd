//! In-memory key store.
//!
//! The store holds an immutable, versioned [`KeySnapshot`] behind a
//! `tokio::sync::watch` channel. Readers clone the `Arc` and never see a
//! half-applied mutation. Writers build the next snapshot inside the
//! channel's write section, so concurrent mutations serialize.
//!
//! # Invariants
//!
//! - At most one `Active` and at most one `Pending` key
//! - A key id is accepted once; ids stay reserved after purge
//! - Every applied mutation bumps `version` by one

use crate::errors::KeyError;
use crate::models::{KeyMaterial, KeyStatus};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Immutable view of every key the store knows about.
#[derive(Debug, Default)]
pub struct KeySnapshot {
    version: u64,
    /// Sorted by `created_at`, then `key_id`.
    keys: Vec<Arc<KeyMaterial>>,
    known_ids: HashSet<String>,
}

impl KeySnapshot {
    fn build(version: u64, mut keys: Vec<Arc<KeyMaterial>>, known_ids: HashSet<String>) -> Self {
        keys.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key_id.cmp(&b.key_id))
        });
        Self {
            version,
            keys,
            known_ids,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Every stored key, including pending and revoked ones.
    pub fn keys(&self) -> &[Arc<KeyMaterial>] {
        &self.keys
    }

    /// Ids ever accepted by the store, including purged ones.
    pub fn known_ids(&self) -> impl Iterator<Item = &str> {
        self.known_ids.iter().map(String::as_str)
    }

    pub fn get(&self, key_id: &str) -> Option<&Arc<KeyMaterial>> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }

    pub fn active(&self) -> Option<&Arc<KeyMaterial>> {
        self.with_status(KeyStatus::Active)
    }

    pub fn pending(&self) -> Option<&Arc<KeyMaterial>> {
        self.with_status(KeyStatus::Pending)
    }

    fn with_status(&self, status: KeyStatus) -> Option<&Arc<KeyMaterial>> {
        self.keys.iter().find(|k| k.status == status)
    }

    /// Active plus retired-within-retention, oldest first.
    pub fn verifiable(&self, now: DateTime<Utc>, retention: Duration) -> Vec<Arc<KeyMaterial>> {
        self.keys
            .iter()
            .filter(|k| k.is_verifiable(now, retention))
            .cloned()
            .collect()
    }

    /// Verifiable keys plus the pending key, oldest first.
    pub fn published(&self, now: DateTime<Utc>, retention: Duration) -> Vec<Arc<KeyMaterial>> {
        self.keys
            .iter()
            .filter(|k| k.status == KeyStatus::Pending || k.is_verifiable(now, retention))
            .cloned()
            .collect()
    }

    fn replacing(&self, key_id: &str, replacement: KeyMaterial) -> Vec<Arc<KeyMaterial>> {
        let replacement = Arc::new(replacement);
        self.keys
            .iter()
            .map(|k| {
                if k.key_id == key_id {
                    Arc::clone(&replacement)
                } else {
                    Arc::clone(k)
                }
            })
            .collect()
    }
}

/// Result of promoting a pending key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub promoted: String,
    /// The previously active key, now retired.
    pub demoted: Option<String>,
}

enum Mutation<T> {
    Replace {
        keys: Vec<Arc<KeyMaterial>>,
        known_ids: Option<HashSet<String>>,
        value: T,
    },
    Unchanged(T),
}

/// Shared, versioned set of signing keys.
pub struct KeyStore {
    tx: watch::Sender<Arc<KeySnapshot>>,
    retention: Duration,
}

impl KeyStore {
    /// Empty store; a key must be activated before signing.
    pub fn new(retention: Duration) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(KeySnapshot::default()));
        Self { tx, retention }
    }

    /// Store seeded from persisted keys.
    ///
    /// `known_ids` carries ids of keys purged before the snapshot was written.
    pub fn restore(
        retention: Duration,
        keys: Vec<KeyMaterial>,
        known_ids: impl IntoIterator<Item = String>,
    ) -> Result<Self, KeyError> {
        let mut ids: HashSet<String> = known_ids.into_iter().collect();
        let mut seen = HashSet::new();
        let mut active = 0usize;
        let mut pending = 0usize;

        for key in &keys {
            if !seen.insert(key.key_id.clone()) {
                return Err(KeyError::DuplicateKeyId(key.key_id.clone()));
            }
            match key.status {
                KeyStatus::Active => active += 1,
                KeyStatus::Pending => pending += 1,
                KeyStatus::Retired | KeyStatus::Revoked => {}
            }
        }
        if active > 1 || pending > 1 {
            return Err(KeyError::InvalidTransition(format!(
                "Persisted key set has {active} active and {pending} pending keys"
            )));
        }

        ids.extend(seen);
        let version = u64::from(!keys.is_empty());
        let snapshot = KeySnapshot::build(version, keys.into_iter().map(Arc::new).collect(), ids);
        let (tx, _rx) = watch::channel(Arc::new(snapshot));

        Ok(Self { tx, retention })
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<KeySnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receiver notified on every applied mutation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<KeySnapshot>> {
        self.tx.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.tx.borrow().version
    }

    pub fn current_active_key(&self) -> Result<Arc<KeyMaterial>, KeyError> {
        self.snapshot()
            .active()
            .cloned()
            .ok_or(KeyError::NoActiveKey)
    }

    pub fn all_verifiable_keys(&self, now: DateTime<Utc>) -> Vec<Arc<KeyMaterial>> {
        self.snapshot().verifiable(now, self.retention)
    }

    pub fn published_keys(&self, now: DateTime<Utc>) -> Vec<Arc<KeyMaterial>> {
        self.snapshot().published(now, self.retention)
    }

    /// Stage a freshly generated key for publication ahead of promotion.
    #[instrument(skip_all, fields(key_id = %key.key_id))]
    pub fn insert_pending_key(&self, key: KeyMaterial) -> Result<u64, KeyError> {
        if key.status != KeyStatus::Pending {
            return Err(KeyError::InvalidTransition(format!(
                "Expected a pending key, got {}",
                key.status.as_str()
            )));
        }
        if !key.has_private_component() {
            return Err(KeyError::InvalidTransition(
                "Pending key has no private component".to_string(),
            ));
        }

        self.apply(|current| {
            if current.known_ids.contains(&key.key_id) {
                return Err(KeyError::DuplicateKeyId(key.key_id.clone()));
            }
            if let Some(existing) = current.pending() {
                return Err(KeyError::InvalidTransition(format!(
                    "Key {} is already pending",
                    existing.key_id
                )));
            }

            let mut known_ids = current.known_ids.clone();
            known_ids.insert(key.key_id.clone());
            let mut keys = current.keys.clone();
            keys.push(Arc::new(key));

            Ok(Mutation::Replace {
                keys,
                known_ids: Some(known_ids),
                value: (),
            })
        })?;

        debug!(target: "jwks.keystore", "Pending key inserted");
        Ok(self.version())
    }

    /// Install the first signing key directly as active.
    ///
    /// Used at startup only; refuses when an active key already exists.
    #[instrument(skip_all, fields(key_id = %key.key_id))]
    pub fn activate_initial_key(&self, key: KeyMaterial) -> Result<u64, KeyError> {
        if !matches!(key.status, KeyStatus::Pending | KeyStatus::Active) {
            return Err(KeyError::InvalidTransition(format!(
                "Cannot activate a {} key",
                key.status.as_str()
            )));
        }
        if !key.has_private_component() {
            return Err(KeyError::InvalidTransition(
                "Initial key has no private component".to_string(),
            ));
        }

        self.apply(|current| {
            if let Some(active) = current.active() {
                return Err(KeyError::InvalidTransition(format!(
                    "Key {} is already active",
                    active.key_id
                )));
            }
            if current.known_ids.contains(&key.key_id) {
                return Err(KeyError::DuplicateKeyId(key.key_id.clone()));
            }

            let mut known_ids = current.known_ids.clone();
            known_ids.insert(key.key_id.clone());
            let mut keys = current.keys.clone();
            keys.push(Arc::new(key.activated()));

            Ok(Mutation::Replace {
                keys,
                known_ids: Some(known_ids),
                value: (),
            })
        })?;

        info!(target: "jwks.keystore", "Initial signing key activated");
        Ok(self.version())
    }

    /// Make the pending key active and retire the previous active key with
    /// `retired_at = now`, in one swap.
    #[instrument(skip_all, fields(key_id = %key_id))]
    pub fn promote(&self, key_id: &str, now: DateTime<Utc>) -> Result<Promotion, KeyError> {
        let promotion = self.apply(|current| {
            let candidate = current
                .get(key_id)
                .ok_or_else(|| KeyError::KeyNotFound(key_id.to_string()))?;
            if candidate.status != KeyStatus::Pending {
                return Err(KeyError::InvalidTransition(format!(
                    "Cannot promote a {} key",
                    candidate.status.as_str()
                )));
            }

            let demoted = current.active().map(|k| k.key_id.clone());
            let keys = current
                .keys
                .iter()
                .map(|k| match k.status {
                    _ if k.key_id == key_id => Arc::new(k.activated()),
                    KeyStatus::Active => Arc::new(k.retired(now)),
                    _ => Arc::clone(k),
                })
                .collect();

            Ok(Mutation::Replace {
                keys,
                known_ids: None,
                value: Promotion {
                    promoted: key_id.to_string(),
                    demoted,
                },
            })
        })?;

        info!(
            target: "jwks.keystore",
            demoted = promotion.demoted.as_deref().unwrap_or("none"),
            "Key promoted to active"
        );
        Ok(promotion)
    }

    /// Confirm a key is retired.
    ///
    /// A no-op for keys already retired. Refuses active keys, which would
    /// leave nothing to sign with, and pending or revoked keys.
    #[instrument(skip_all, fields(key_id = %key_id))]
    pub fn retire(&self, key_id: &str, now: DateTime<Utc>) -> Result<(), KeyError> {
        self.apply(|current| {
            let key = current
                .get(key_id)
                .ok_or_else(|| KeyError::KeyNotFound(key_id.to_string()))?;

            match key.status {
                KeyStatus::Retired => Ok(Mutation::Unchanged(())),
                KeyStatus::Active => Err(KeyError::InvalidTransition(
                    "Cannot retire the active key".to_string(),
                )),
                KeyStatus::Pending | KeyStatus::Revoked => Err(KeyError::InvalidTransition(
                    format!("Cannot retire a {} key", key.status.as_str()),
                )),
            }
        })?;

        debug!(target: "jwks.keystore", now = %now, "Retirement confirmed");
        Ok(())
    }

    /// Withdraw a key immediately.
    ///
    /// Revoked keys leave the JWKS, fail verification with `RevokedKey` and
    /// are purged on the next sweep. The active key cannot be revoked; rotate
    /// first.
    #[instrument(skip_all, fields(key_id = %key_id))]
    pub fn revoke(&self, key_id: &str, now: DateTime<Utc>) -> Result<(), KeyError> {
        let changed = self.apply(|current| {
            let key = current
                .get(key_id)
                .ok_or_else(|| KeyError::KeyNotFound(key_id.to_string()))?;

            match key.status {
                KeyStatus::Revoked => Ok(Mutation::Unchanged(false)),
                KeyStatus::Active => Err(KeyError::InvalidTransition(
                    "Cannot revoke the active key".to_string(),
                )),
                KeyStatus::Pending | KeyStatus::Retired => Ok(Mutation::Replace {
                    keys: current.replacing(key_id, key.revoked(now)),
                    known_ids: None,
                    value: true,
                }),
            }
        })?;

        if changed {
            warn!(target: "jwks.keystore", "Key revoked");
        }
        Ok(())
    }

    /// Drop retired keys past retention and all revoked keys.
    ///
    /// Returns the purged ids; the version only moves when something was
    /// removed.
    #[instrument(skip_all)]
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let retention = self.retention;
        let purged = self.apply(|current| {
            let (gone, kept): (Vec<_>, Vec<_>) = current
                .keys
                .iter()
                .cloned()
                .partition(|k| k.status == KeyStatus::Revoked || k.is_expired(now, retention));

            if gone.is_empty() {
                return Ok(Mutation::Unchanged(Vec::new()));
            }

            Ok(Mutation::Replace {
                keys: kept,
                known_ids: None,
                value: gone.iter().map(|k| k.key_id.clone()).collect::<Vec<_>>(),
            })
        });

        match purged {
            Ok(ids) => {
                if !ids.is_empty() {
                    info!(target: "jwks.keystore", purged = ids.len(), "Purged expired keys");
                }
                ids
            }
            Err(e) => {
                warn!(target: "jwks.keystore", error = %e, "Purge was not applied");
                Vec::new()
            }
        }
    }

    fn apply<T>(
        &self,
        mutate: impl FnOnce(&KeySnapshot) -> Result<Mutation<T>, KeyError>,
    ) -> Result<T, KeyError> {
        let mut outcome = None;

        self.tx.send_if_modified(|current| match mutate(current) {
            Ok(Mutation::Replace {
                keys,
                known_ids,
                value,
            }) => {
                let known_ids = known_ids.unwrap_or_else(|| current.known_ids.clone());
                *current = Arc::new(KeySnapshot::build(
                    current.version.saturating_add(1),
                    keys,
                    known_ids,
                ));
                outcome = Some(Ok(value));
                true
            }
            Ok(Mutation::Unchanged(value)) => {
                outcome = Some(Ok(value));
                false
            }
            Err(e) => {
                outcome = Some(Err(e));
                false
            }
        });

        outcome.unwrap_or(Err(KeyError::StoreContention))
    }
}
