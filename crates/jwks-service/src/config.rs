//! JWKS issuer configuration.
//!
//! Configuration is loaded from environment variables. The key-file master
//! key and inline private JWKs are redacted in Debug output.

use crate::crypto::{import_private_jwk, KeyAlgorithm, MASTER_KEY_LEN};
use crate::errors::KeyError;
use crate::models::KeyMaterial;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{clone_secret_bytes, SecretBox, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_ROTATION_INTERVAL_SECONDS: u64 = 86_400;
pub const DEFAULT_OVERLAP_DELAY_SECONDS: u64 = 300;
pub const DEFAULT_MAX_TOKEN_LIFETIME_SECONDS: u64 = 3_600;
pub const DEFAULT_TOKEN_LIFETIME_SECONDS: u64 = 30;
pub const DEFAULT_LEEWAY_SECONDS: u64 = 2;
pub const DEFAULT_ROTATION_CHECK_INTERVAL_SECONDS: u64 = 5;
pub const DEFAULT_ISSUER: &str = "JWT API Simulation";
pub const DEFAULT_AUDIENCE: &str = "JWT API Simulation";

/// `max-age` of the published JWKS. A pending key must be published at
/// least this long before it signs, so the overlap delay may not be shorter.
pub const JWKS_MAX_AGE_SECONDS: u64 = 300;

/// Upper bound for any duration setting (10 years).
pub const MAX_DURATION_SECONDS: u64 = 315_360_000;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Where the initial signing key comes from, when not generated.
#[derive(Clone)]
pub enum InitialKeySource {
    /// Path to a file holding a private JWK, with inline JSON to use when
    /// the file does not exist.
    File {
        path: PathBuf,
        fallback: Option<SecretString>,
    },
    /// Private JWK JSON supplied inline.
    Inline(SecretString),
}

impl InitialKeySource {
    /// Read and import the private JWK as a pending key created at `now`.
    ///
    /// A missing file falls back to the inline JSON when one is configured.
    /// Any other read error is fatal.
    pub async fn load(&self, now: DateTime<Utc>) -> Result<KeyMaterial, KeyError> {
        let json = match self {
            InitialKeySource::File { path, fallback } => {
                match (tokio::fs::read_to_string(path).await, fallback) {
                    (Ok(contents), _) => SecretString::from(contents),
                    (Err(e), Some(json)) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!(
                            target: "jwks.config",
                            path = %path.display(),
                            "Private JWK file not found, using JWK_PRIVATE_JSON"
                        );
                        json.clone()
                    }
                    (Err(e), _) => {
                        return Err(KeyError::KeyGeneration(format!(
                            "Failed to read private JWK file {}: {e}",
                            path.display()
                        )))
                    }
                }
            }
            InitialKeySource::Inline(json) => json.clone(),
        };

        import_private_jwk(&json, now)
    }
}

impl fmt::Debug for InitialKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitialKeySource::File { path, fallback } => f
                .debug_struct("File")
                .field("path", path)
                .field("fallback", &fallback.as_ref().map(|_| "[REDACTED]"))
                .finish(),
            InitialKeySource::Inline(_) => f.debug_tuple("Inline").field(&"[REDACTED]").finish(),
        }
    }
}

/// Key-file persistence settings.
pub struct KeyStorePersistence {
    pub path: PathBuf,
    pub master_key: SecretBox<Vec<u8>>,
}

impl Clone for KeyStorePersistence {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            master_key: clone_secret_bytes(&self.master_key),
        }
    }
}

impl fmt::Debug for KeyStorePersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStorePersistence")
            .field("path", &self.path)
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

/// JWKS issuer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8000").
    pub bind_address: String,

    /// How old the active key may get before a rotation starts.
    pub rotation_interval_seconds: u64,

    /// How long a pending key is published before it signs.
    pub overlap_delay_seconds: u64,

    /// Longest lifetime of any token signed by this service.
    pub max_token_lifetime_seconds: u64,

    /// Lifetime of tokens issued through the token endpoint.
    pub token_lifetime_seconds: u64,

    /// Clock skew tolerance for `iat`.
    pub jwt_clock_skew_seconds: u64,

    /// How long a retired key stays verifiable.
    pub retention_window_seconds: u64,

    pub key_algorithm: KeyAlgorithm,

    pub issuer: String,

    pub audience: String,

    /// Leeway applied to `nbf` and `exp`.
    pub leeway_seconds: u64,

    /// Rotator tick.
    pub rotation_check_interval_seconds: u64,

    pub key_store: Option<KeyStorePersistence>,

    pub initial_key: Option<InitialKeySource>,

    /// Shutdown drain period.
    pub drain_seconds: u64,

    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid token lifetime configuration: {0}")]
    InvalidTokenLifetime(String),

    #[error("Invalid retention window configuration: {0}")]
    InvalidRetentionWindow(String),

    #[error("Invalid rotation configuration: {0}")]
    InvalidRotation(String),

    #[error("Unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid master key format: {0}")]
    InvalidMasterKey(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = match vars.get("BIND_ADDRESS") {
            Some(addr) => addr.clone(),
            None => {
                let port = match vars.get("PORT") {
                    Some(value) => value.parse::<u16>().map_err(|e| {
                        ConfigError::InvalidValue(format!(
                            "PORT must be a valid port number, got '{}': {}",
                            value, e
                        ))
                    })?,
                    None => DEFAULT_PORT,
                };
                format!("0.0.0.0:{port}")
            }
        };

        let rotation_interval_seconds = parse_positive(
            vars,
            "ROTATION_INTERVAL_SECONDS",
            DEFAULT_ROTATION_INTERVAL_SECONDS,
            ConfigError::InvalidRotation,
        )?;

        let overlap_delay_seconds = parse_seconds(
            vars,
            "OVERLAP_DELAY_SECONDS",
            DEFAULT_OVERLAP_DELAY_SECONDS,
            ConfigError::InvalidRotation,
        )?;
        if overlap_delay_seconds < JWKS_MAX_AGE_SECONDS {
            return Err(ConfigError::InvalidRotation(format!(
                "OVERLAP_DELAY_SECONDS must be at least the JWKS max-age ({}), got {}",
                JWKS_MAX_AGE_SECONDS, overlap_delay_seconds
            )));
        }
        if overlap_delay_seconds >= rotation_interval_seconds {
            return Err(ConfigError::InvalidRotation(format!(
                "OVERLAP_DELAY_SECONDS must be less than ROTATION_INTERVAL_SECONDS ({}), got {}",
                rotation_interval_seconds, overlap_delay_seconds
            )));
        }

        let rotation_check_interval_seconds = parse_positive(
            vars,
            "ROTATION_CHECK_INTERVAL_SECONDS",
            DEFAULT_ROTATION_CHECK_INTERVAL_SECONDS,
            ConfigError::InvalidRotation,
        )?;

        let max_token_lifetime_seconds = parse_positive(
            vars,
            "MAX_TOKEN_LIFETIME_SECONDS",
            DEFAULT_MAX_TOKEN_LIFETIME_SECONDS,
            ConfigError::InvalidTokenLifetime,
        )?;

        let token_lifetime_seconds = parse_positive(
            vars,
            "TOKEN_LIFETIME_SECONDS",
            DEFAULT_TOKEN_LIFETIME_SECONDS,
            ConfigError::InvalidTokenLifetime,
        )?;
        if token_lifetime_seconds > max_token_lifetime_seconds {
            return Err(ConfigError::InvalidTokenLifetime(format!(
                "TOKEN_LIFETIME_SECONDS must not exceed MAX_TOKEN_LIFETIME_SECONDS ({}), got {}",
                max_token_lifetime_seconds, token_lifetime_seconds
            )));
        }

        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs()
        };

        // A retired key must outlive every token it signed, plus skew.
        let minimum_retention = max_token_lifetime_seconds + jwt_clock_skew_seconds;
        let retention_window_seconds = parse_seconds(
            vars,
            "RETENTION_WINDOW_SECONDS",
            minimum_retention,
            ConfigError::InvalidRetentionWindow,
        )?;
        if retention_window_seconds < minimum_retention {
            return Err(ConfigError::InvalidRetentionWindow(format!(
                "RETENTION_WINDOW_SECONDS must be at least MAX_TOKEN_LIFETIME_SECONDS + JWT_CLOCK_SKEW_SECONDS ({}), got {}",
                minimum_retention, retention_window_seconds
            )));
        }

        // Rotation mints new keys, so only generatable algorithms qualify.
        let key_algorithm = match vars.get("KEY_ALGORITHM") {
            Some(name) => KeyAlgorithm::from_name(name)
                .filter(KeyAlgorithm::can_generate)
                .ok_or_else(|| ConfigError::UnsupportedAlgorithm(name.clone()))?,
            None => KeyAlgorithm::EdDsa,
        };

        let issuer = non_empty(vars, "JWT_ISSUER", DEFAULT_ISSUER)?;
        let audience = non_empty(vars, "JWT_AUDIENCE", DEFAULT_AUDIENCE)?;

        let leeway_seconds = parse_seconds(
            vars,
            "JWT_LEEWAY_SECONDS",
            DEFAULT_LEEWAY_SECONDS,
            ConfigError::InvalidTokenLifetime,
        )?;
        if leeway_seconds > jwt_clock_skew_seconds {
            return Err(ConfigError::InvalidTokenLifetime(format!(
                "JWT_LEEWAY_SECONDS must not exceed JWT_CLOCK_SKEW_SECONDS ({}), got {}",
                jwt_clock_skew_seconds, leeway_seconds
            )));
        }

        let key_store = match vars.get("KEY_STORE_PATH").filter(|p| !p.is_empty()) {
            Some(path) => {
                let master_key_base64 = vars
                    .get("KEY_STORE_MASTER_KEY")
                    .ok_or_else(|| ConfigError::MissingEnvVar("KEY_STORE_MASTER_KEY".to_string()))?;
                let master_key = general_purpose::STANDARD
                    .decode(master_key_base64)
                    .map_err(|e| ConfigError::InvalidMasterKey(format!("Base64 decode error: {e}")))?;
                if master_key.len() != MASTER_KEY_LEN {
                    return Err(ConfigError::InvalidMasterKey(format!(
                        "Expected {} bytes, got {}",
                        MASTER_KEY_LEN,
                        master_key.len()
                    )));
                }

                Some(KeyStorePersistence {
                    path: PathBuf::from(path),
                    master_key: SecretBox::new(Box::new(master_key)),
                })
            }
            None => None,
        };

        // The file wins when both are set; the JSON covers a missing file.
        let inline_jwk = vars
            .get("JWK_PRIVATE_JSON")
            .filter(|j| !j.is_empty())
            .map(|json| SecretString::from(json.clone()));
        let initial_key = match vars.get("JWK_PRIVATE_FILE").filter(|p| !p.is_empty()) {
            Some(path) => Some(InitialKeySource::File {
                path: PathBuf::from(path),
                fallback: inline_jwk,
            }),
            None => inline_jwk.map(InitialKeySource::Inline),
        };

        let drain_seconds = parse_seconds(vars, "DRAIN_SECONDS", 0, ConfigError::InvalidValue)?;

        let log_format = match vars.get("LOG_FORMAT").map(String::as_str) {
            Some("json") => LogFormat::Json,
            Some("text") | None => LogFormat::Text,
            Some(other) => {
                return Err(ConfigError::InvalidValue(format!(
                    "LOG_FORMAT must be 'json' or 'text', got '{}'",
                    other
                )))
            }
        };

        Ok(Config {
            bind_address,
            rotation_interval_seconds,
            overlap_delay_seconds,
            max_token_lifetime_seconds,
            token_lifetime_seconds,
            jwt_clock_skew_seconds,
            retention_window_seconds,
            key_algorithm,
            issuer,
            audience,
            leeway_seconds,
            rotation_check_interval_seconds,
            key_store,
            initial_key,
            drain_seconds,
            log_format,
        })
    }

    pub fn retention_window(&self) -> chrono::Duration {
        seconds(self.retention_window_seconds)
    }

    pub fn rotation_interval(&self) -> chrono::Duration {
        seconds(self.rotation_interval_seconds)
    }

    pub fn overlap_delay(&self) -> chrono::Duration {
        seconds(self.overlap_delay_seconds)
    }

    pub fn rotation_check_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_check_interval_seconds)
    }
}

/// Every duration setting is capped at `MAX_DURATION_SECONDS`, so the cast
/// cannot wrap.
#[allow(clippy::cast_possible_wrap)]
fn seconds(value: u64) -> chrono::Duration {
    chrono::Duration::seconds(value.min(MAX_DURATION_SECONDS) as i64)
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    err: fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        err(format!(
            "{} must be a valid non-negative integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value > MAX_DURATION_SECONDS {
        return Err(err(format!(
            "{} must not exceed {} seconds, got {}",
            name, MAX_DURATION_SECONDS, value
        )));
    }

    Ok(value)
}

fn parse_positive(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    err: fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    let value = parse_seconds(vars, name, default, err)?;
    if value == 0 {
        return Err(err(format!("{} must be greater than 0", name)));
    }
    Ok(value)
}

fn non_empty(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<String, ConfigError> {
    match vars.get(name) {
        Some(value) if value.trim().is_empty() => Err(ConfigError::InvalidValue(format!(
            "{} must not be empty",
            name
        ))),
        Some(value) => Ok(value.clone()),
        None => Ok(default.to_string()),
    }
}
