//! Renders the public view of the key store as a cached JWKS document.
//!
//! The cached document is reused while the store version is unchanged and
//! no published retired key has passed its retention deadline.

use crate::errors::KeyError;
use crate::keystore::{KeySnapshot, KeyStore};
use crate::models::{JsonWebKey, Jwks};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

/// A serialized JWKS plus its HTTP cache validator.
#[derive(Debug, Clone)]
pub struct JwksDocument {
    /// Store version the document was rendered from.
    pub version: u64,
    pub body: Bytes,
    /// Strong ETag, quoted.
    pub etag: String,
    pub key_count: usize,
    /// Earliest instant a published key drops out of the set.
    pub valid_until: Option<DateTime<Utc>>,
}

impl JwksDocument {
    fn is_fresh(&self, version: u64, now: DateTime<Utc>) -> bool {
        self.version == version && self.valid_until.map_or(true, |until| now < until)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

pub struct JwksPublisher {
    store: Arc<KeyStore>,
    cache: RwLock<Option<Arc<JwksDocument>>>,
}

impl JwksPublisher {
    pub fn new(store: Arc<KeyStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(None),
        }
    }

    /// Current JWKS document, rebuilt when the store has moved on.
    ///
    /// # Errors
    ///
    /// `NoActiveKey` when nothing is published.
    #[instrument(skip_all)]
    pub fn document(
        &self,
        now: DateTime<Utc>,
    ) -> Result<(Arc<JwksDocument>, CacheStatus), KeyError> {
        let snapshot = self.store.snapshot();

        {
            let cache = self
                .cache
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(document) = cache.as_ref() {
                if document.is_fresh(snapshot.version(), now) {
                    return Ok((Arc::clone(document), CacheStatus::Hit));
                }
            }
        }

        let document = Arc::new(render(&snapshot, now, self.store.retention())?);
        debug!(
            target: "jwks.publisher",
            version = document.version,
            keys = document.key_count,
            "JWKS document rebuilt"
        );

        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Never replace a newer document with an older one.
        if cache
            .as_ref()
            .map_or(true, |cached| cached.version <= document.version)
        {
            *cache = Some(Arc::clone(&document));
        }

        Ok((document, CacheStatus::Miss))
    }
}

fn render(
    snapshot: &KeySnapshot,
    now: DateTime<Utc>,
    retention: chrono::Duration,
) -> Result<JwksDocument, KeyError> {
    let keys = snapshot.published(now, retention);
    if keys.is_empty() {
        return Err(KeyError::NoActiveKey);
    }

    let jwks = Jwks {
        keys: keys.iter().map(|k| JsonWebKey::from(k.as_ref())).collect(),
    };
    let body = serde_json::to_vec(&jwks)
        .map_err(|e| KeyError::Persistence(format!("Failed to encode JWKS: {e}")))?;

    let digest = Sha256::digest(&body);
    let etag = format!("\"{}\"", hex::encode(digest.get(..8).unwrap_or_default()));

    Ok(JwksDocument {
        version: snapshot.version(),
        body: Bytes::from(body),
        etag,
        key_count: keys.len(),
        valid_until: keys
            .iter()
            .filter_map(|k| k.verifiable_until(retention))
            .min(),
    })
}
