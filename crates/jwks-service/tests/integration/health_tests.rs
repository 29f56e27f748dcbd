//! Integration tests for health probes and the metrics scrape.

use jwks_test_utils::TestJwksServer;
use reqwest::StatusCode;

/// /health returns 200 OK as long as the process serves HTTP.
#[tokio::test]
async fn test_health_endpoint_returns_ok() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;

    let response = server
        .client()
        .get(format!("{}/health", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "OK");

    Ok(())
}

/// /ready reports the active key once bootstrapped.
#[tokio::test]
async fn test_ready_endpoint_reports_active_key() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;
    let active = server.store().current_active_key()?;

    let response = server
        .client()
        .get(format!("{}/ready", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["active_key_id"], active.key_id.as_str());
    assert_eq!(body["published_keys"], 1);

    Ok(())
}

/// /ready counts a pending key among published keys.
#[tokio::test]
async fn test_ready_counts_pending_key() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;
    server.publish_pending_key()?;

    let body: serde_json::Value = server
        .client()
        .get(format!("{}/ready", server.url()))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["published_keys"], 2);

    Ok(())
}

/// /metrics serves Prometheus text.
#[tokio::test]
async fn test_metrics_endpoint_is_exposed() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;
    server.fetch_jwks().await?;

    let response = server
        .client()
        .get(format!("{}/metrics", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);

    Ok(())
}

/// Unknown paths are plain 404s.
#[tokio::test]
async fn test_unknown_path_is_not_found() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;

    let response = server
        .client()
        .get(format!("{}/.well-known/openid-configuration", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}
