//! JWKS Issuer
//!
//! Serves `/.well-known/jwks.json` and rotates the signing keys behind it.

use chrono::Utc;
use jwks_service::config::{Config, LogFormat};
use jwks_service::errors::KeyError;
use jwks_service::keystore::KeyStore;
use jwks_service::observability::metrics::init_metrics_recorder;
use jwks_service::repositories::KeyFileRepository;
use jwks_service::routes::{self, AppState};
use jwks_service::services::{RotationPolicy, Rotator, SystemKeyGenerator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    init_tracing(config.as_ref().map_or(LogFormat::Text, |c| c.log_format));

    info!("Starting JWKS issuer");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        algorithm = %config.key_algorithm,
        rotation_interval_seconds = config.rotation_interval_seconds,
        overlap_delay_seconds = config.overlap_delay_seconds,
        retention_window_seconds = config.retention_window_seconds,
        persistent = config.key_store.is_some(),
        "Configuration loaded successfully"
    );

    // Install before anything records a metric.
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let repository = config
        .key_store
        .as_ref()
        .map(|ks| KeyFileRepository::new(ks.path.clone(), &ks.master_key));

    let store = Arc::new(load_store(&config, repository.as_ref()).await.map_err(|e| {
        error!("Failed to load key store: {}", e);
        e
    })?);

    let initial_key = match &config.initial_key {
        Some(source) => Some(source.load(Utc::now()).await.map_err(|e| {
            error!("Failed to import initial signing key: {}", e);
            e
        })?),
        None => None,
    };

    let mut rotator = Rotator::new(
        Arc::clone(&store),
        RotationPolicy::from_config(&config),
        Arc::new(SystemKeyGenerator),
        repository,
    );
    rotator
        .bootstrap(Utc::now(), initial_key)
        .await
        .map_err(|e| {
            error!("Failed to bootstrap signing key: {}", e);
            e
        })?;

    let active = store.current_active_key()?;
    info!(key_id = %active.key_id, "Signing key ready");

    let cancel_token = CancellationToken::new();
    let rotator_handle = tokio::spawn(rotator.run(cancel_token.clone()));

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    let state = Arc::new(AppState::new(&config, store));
    let app = routes::build_routes(state, metrics_handle);

    info!("JWKS issuer listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.drain_seconds))
    .await?;

    cancel_token.cancel();
    if let Err(e) = rotator_handle.await {
        error!("Key rotator task failed: {}", e);
    }

    info!("JWKS issuer shutdown complete");

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "jwks=debug,common=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Key store from the key file when persistence is on and a file exists.
async fn load_store(
    config: &Config,
    repository: Option<&KeyFileRepository>,
) -> Result<KeyStore, KeyError> {
    let retention = config.retention_window();

    let Some(repository) = repository else {
        return Ok(KeyStore::new(retention));
    };

    match repository.load().await? {
        Some(loaded) => {
            info!(
                path = %repository.path().display(),
                keys = loaded.keys.len(),
                "Restoring keys from key file"
            );
            KeyStore::restore(retention, loaded.keys, loaded.known_key_ids)
        }
        None => {
            info!(path = %repository.path().display(), "No key file yet, starting empty");
            Ok(KeyStore::new(retention))
        }
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is over.
async fn shutdown_signal(drain_secs: u64) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    if drain_secs > 0 {
        warn!("Draining connections for {} seconds...", drain_secs);
        tokio::time::sleep(Duration::from_secs(drain_secs)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (DRAIN_SECONDS=0)");
    }
}
