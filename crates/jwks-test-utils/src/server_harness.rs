//! Test server harness for E2E testing
//!
//! Provides TestJwksServer for spawning real JWKS issuer instances in tests.

use chrono::Utc;
use jwks_service::config::Config;
use jwks_service::crypto::generate_key_pair;
use jwks_service::keystore::{KeyStore, Promotion};
use jwks_service::observability::metrics::init_metrics_recorder;
use jwks_service::routes::{self, AppState};
use jwks_service::services::{RotationPolicy, Rotator, SystemKeyGenerator};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the JWKS issuer in E2E tests
///
/// The rotator is bootstrapped but not started; tests drive rotations
/// explicitly through [`TestJwksServer::rotate_keys`].
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_jwks_e2e() -> Result<(), anyhow::Error> {
///     let server = TestJwksServer::spawn().await?;
///     let response = reqwest::get(format!("{}/.well-known/jwks.json", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestJwksServer {
    addr: SocketAddr,
    config: Config,
    store: Arc<KeyStore>,
    client: reqwest::Client,
    _handle: JoinHandle<()>,
}

impl TestJwksServer {
    /// Spawn a server with default configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(&[]).await
    }

    /// Spawn a server with extra environment-style configuration.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Bootstrap a signing key exactly as startup does
    /// - Start the HTTP server in the background
    pub async fn spawn_with_vars(vars: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let mut env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.insert("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string());

        let config = Config::from_vars(&env)
            .map_err(|e| anyhow::anyhow!("Invalid test configuration: {}", e))?;

        let store = Arc::new(KeyStore::new(config.retention_window()));
        let initial_key = match &config.initial_key {
            Some(source) => Some(source.load(Utc::now()).await?),
            None => None,
        };

        let mut rotator = Rotator::new(
            Arc::clone(&store),
            RotationPolicy::from_config(&config),
            Arc::new(SystemKeyGenerator),
            None,
        );
        rotator
            .bootstrap(Utc::now(), initial_key)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bootstrap signing key: {}", e))?;

        let state = Arc::new(AppState::new(&config, Arc::clone(&store)));

        // The global recorder can only be installed once per process; later
        // servers get a standalone recorder.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                PrometheusBuilder::new().build_recorder().handle()
            }
        };

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            store,
            client: reqwest::Client::new(),
            _handle: handle,
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The key store the server reads from.
    pub fn store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Publish a fresh pending key at the current time.
    ///
    /// Returns its key id.
    pub fn publish_pending_key(&self) -> Result<String, anyhow::Error> {
        let algorithm = self.config.key_algorithm;
        let key_id = format!("test-{}", uuid_suffix());
        let key = generate_key_pair(algorithm)?.into_pending(key_id.clone(), algorithm, Utc::now());
        self.store.insert_pending_key(key)?;
        Ok(key_id)
    }

    /// Publish and immediately promote a fresh key, as a completed
    /// rotation would.
    pub fn rotate_keys(&self) -> Result<Promotion, anyhow::Error> {
        let key_id = match self.store.snapshot().pending() {
            Some(pending) => pending.key_id.clone(),
            None => self.publish_pending_key()?,
        };
        Ok(self.store.promote(&key_id, Utc::now())?)
    }

    /// GET the JWKS document as JSON.
    pub async fn fetch_jwks(&self) -> Result<serde_json::Value, anyhow::Error> {
        let response = self
            .client
            .get(format!("{}/.well-known/jwks.json", self.url()))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    /// Issue a token for `subject` through the HTTP API.
    pub async fn issue_token(&self, subject: &str) -> Result<String, anyhow::Error> {
        let response = self
            .client
            .post(format!("{}/api/v1/tokens", self.url()))
            .json(&serde_json::json!({ "sub": subject }))
            .send()
            .await?
            .error_for_status()?;
        let body: serde_json::Value = response.json().await?;
        body["access_token"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("Token response has no access_token: {}", body))
    }

    /// GET /api/v1/ping with `token` as Bearer credential.
    pub async fn ping(&self, token: &str) -> Result<reqwest::Response, anyhow::Error> {
        Ok(self
            .client
            .get(format!("{}/api/v1/ping", self.url()))
            .bearer_auth(token)
            .send()
            .await?)
    }
}

/// Short unique suffix for test key ids.
fn uuid_suffix() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!(
        "{}-{}",
        Utc::now().timestamp_micros(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

impl Drop for TestJwksServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
