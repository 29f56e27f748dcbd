//! Key-file persistence.
//!
//! The whole key set is written as one JSON document. Private components are
//! sealed with AES-256-GCM under the master key, with the key id as
//! associated data; retired and revoked keys carry no private material. Writes go to a sibling temp file which
//! is then renamed over the target.

use crate::crypto::{decrypt_private_key, encrypt_private_key, EncryptedKey, KeyAlgorithm};
use crate::errors::KeyError;
use crate::keystore::KeySnapshot;
use crate::models::{KeyMaterial, KeyStatus, PublicComponent};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use common::secret::{clone_secret_bytes, ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const FILE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct KeyFile {
    format: u32,
    store_version: u64,
    keys: Vec<StoredKey>,
    #[serde(default)]
    known_key_ids: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct StoredKey {
    key_id: String,
    algorithm: KeyAlgorithm,
    public_component: PublicComponent,
    status: KeyStatus,
    created_at: DateTime<Utc>,
    not_before: DateTime<Utc>,
    retired_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    sealed_private: Option<SealedPrivateKey>,
}

#[derive(Serialize, Deserialize)]
struct SealedPrivateKey {
    ciphertext: String,
    nonce: String,
    tag: String,
}

/// Keys loaded from disk, ready for [`crate::keystore::KeyStore::restore`].
pub struct LoadedKeys {
    pub keys: Vec<KeyMaterial>,
    pub known_key_ids: Vec<String>,
}

pub struct KeyFileRepository {
    path: PathBuf,
    master_key: SecretBox<Vec<u8>>,
}

impl KeyFileRepository {
    pub fn new(path: PathBuf, master_key: &SecretBox<Vec<u8>>) -> Self {
        Self {
            path,
            master_key: clone_secret_bytes(master_key),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the key file. Returns `Ok(None)` when it does not exist yet.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> Result<Option<LoadedKeys>, KeyError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeyError::Persistence(format!(
                    "Failed to read key file: {e}"
                )))
            }
        };

        let file: KeyFile = serde_json::from_slice(&bytes)
            .map_err(|e| KeyError::Persistence(format!("Key file is not valid JSON: {e}")))?;
        if file.format != FILE_FORMAT_VERSION {
            return Err(KeyError::Persistence(format!(
                "Unsupported key file format {}",
                file.format
            )));
        }

        let keys = file
            .keys
            .into_iter()
            .map(|stored| self.unseal(stored))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(target: "jwks.key_file", keys = keys.len(), "Key file loaded");
        Ok(Some(LoadedKeys {
            keys,
            known_key_ids: file.known_key_ids,
        }))
    }

    /// Write `snapshot` atomically.
    #[instrument(skip_all, fields(path = %self.path.display(), version = snapshot.version()))]
    pub async fn save(&self, snapshot: &KeySnapshot) -> Result<(), KeyError> {
        let keys = snapshot
            .keys()
            .iter()
            .map(|key| self.seal(key))
            .collect::<Result<Vec<_>, _>>()?;
        let mut known_key_ids: Vec<String> = snapshot.known_ids().map(str::to_string).collect();
        known_key_ids.sort();

        let file = KeyFile {
            format: FILE_FORMAT_VERSION,
            store_version: snapshot.version(),
            keys,
            known_key_ids,
        };
        let body = serde_json::to_vec_pretty(&file)
            .map_err(|e| KeyError::Persistence(format!("Failed to encode key file: {e}")))?;

        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|e| KeyError::Persistence(format!("Failed to write key file: {e}")))?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| KeyError::Persistence(format!("Failed to replace key file: {e}")))?;

        debug!(target: "jwks.key_file", "Key file written");
        Ok(())
    }

    fn seal(&self, key: &KeyMaterial) -> Result<StoredKey, KeyError> {
        let sealed_private = match (key.status, key.private_der()) {
            (KeyStatus::Pending | KeyStatus::Active, Some(private)) => {
                let encrypted = encrypt_private_key(
                    private.expose_secret(),
                    self.master_key.expose_secret(),
                    key.key_id.as_bytes(),
                )?;
                Some(SealedPrivateKey {
                    ciphertext: STANDARD.encode(encrypted.encrypted_data.expose_secret()),
                    nonce: STANDARD.encode(&encrypted.nonce),
                    tag: STANDARD.encode(&encrypted.tag),
                })
            }
            _ => None,
        };

        Ok(StoredKey {
            key_id: key.key_id.clone(),
            algorithm: key.algorithm,
            public_component: key.public_component.clone(),
            status: key.status,
            created_at: key.created_at,
            not_before: key.not_before,
            retired_at: key.retired_at,
            sealed_private,
        })
    }

    fn unseal(&self, stored: StoredKey) -> Result<KeyMaterial, KeyError> {
        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| KeyError::Persistence(format!("Invalid {field} encoding: {e}")))
        };

        let private_component = match (&stored.status, stored.sealed_private) {
            (KeyStatus::Pending | KeyStatus::Active, Some(sealed)) => {
                let encrypted = EncryptedKey {
                    encrypted_data: SecretBox::new(Box::new(decode(
                        "ciphertext",
                        &sealed.ciphertext,
                    )?)),
                    nonce: decode("nonce", &sealed.nonce)?,
                    tag: decode("tag", &sealed.tag)?,
                };
                Some(decrypt_private_key(
                    &encrypted,
                    self.master_key.expose_secret(),
                    stored.key_id.as_bytes(),
                )?)
            }
            (KeyStatus::Pending | KeyStatus::Active, None) => {
                return Err(KeyError::Persistence(format!(
                    "Key {} is {} but has no private component",
                    stored.key_id,
                    stored.status.as_str()
                )));
            }
            _ => None,
        };

        Ok(KeyMaterial {
            key_id: stored.key_id,
            algorithm: stored.algorithm,
            public_component: stored.public_component,
            private_component,
            created_at: stored.created_at,
            not_before: stored.not_before,
            retired_at: stored.retired_at,
            status: stored.status,
        })
    }
}

impl fmt::Debug for KeyFileRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFileRepository")
            .field("path", &self.path)
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}
