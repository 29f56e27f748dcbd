//! Integration tests for `GET /.well-known/jwks.json`.

use jwks_test_utils::*;
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;

fn jwks_url(server: &TestJwksServer) -> String {
    format!("{}/.well-known/jwks.json", server.url())
}

/// The bootstrapped key is published with caching headers.
#[tokio::test]
async fn test_jwks_publishes_active_key() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;
    let active = server.store().current_active_key()?;

    let response = server.client().get(jwks_url(&server)).send().await?;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(
        headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/jwk-set+json")
    );
    assert_eq!(
        headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("public, max-age=300")
    );
    assert!(headers.contains_key(ETAG), "JWKS must carry an ETag");

    let jwks: serde_json::Value = response.json().await?;
    jwks.assert_key_count(1)
        .assert_has_kid(&active.key_id)
        .assert_no_private_parameters()
        .assert_well_formed();
    assert_eq!(jwks["keys"][0]["kty"], "OKP");
    assert_eq!(jwks["keys"][0]["crv"], "Ed25519");
    assert_eq!(jwks["keys"][0]["alg"], "EdDSA");

    Ok(())
}

/// A matching If-None-Match gets 304 until the key set changes.
#[tokio::test]
async fn test_jwks_conditional_request() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;

    let first = server.client().get(jwks_url(&server)).send().await?;
    let etag = first
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing ETag"))?;

    let cached = server
        .client()
        .get(jwks_url(&server))
        .header(IF_NONE_MATCH, &etag)
        .send()
        .await?;
    assert_eq!(cached.status(), StatusCode::NOT_MODIFIED);

    server.rotate_keys()?;

    let changed = server
        .client()
        .get(jwks_url(&server))
        .header(IF_NONE_MATCH, &etag)
        .send()
        .await?;
    assert_eq!(changed.status(), StatusCode::OK);
    assert_ne!(
        changed.headers().get(ETAG).and_then(|v| v.to_str().ok()),
        Some(etag.as_str())
    );

    Ok(())
}

/// A pending key is published before it signs anything.
#[tokio::test]
async fn test_pending_key_published_before_signing() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;
    let active = server.store().current_active_key()?;

    let pending_id = server.publish_pending_key()?;

    server
        .fetch_jwks()
        .await?
        .assert_key_count(2)
        .assert_has_kid(&active.key_id)
        .assert_has_kid(&pending_id);

    let token = server.issue_token(TEST_SUBJECT_ALICE).await?;
    token.assert_signed_by(&active.key_id);

    Ok(())
}

/// ES256 keys are published as P-256 EC keys with both coordinates.
#[tokio::test]
async fn test_jwks_es256_key_shape() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn_with_vars(&[("KEY_ALGORITHM", "ES256")]).await?;

    let jwks = server.fetch_jwks().await?;

    jwks.assert_key_count(1)
        .assert_no_private_parameters()
        .assert_well_formed();
    assert_eq!(jwks["keys"][0]["kty"], "EC");
    assert_eq!(jwks["keys"][0]["crv"], "P-256");
    assert_eq!(jwks["keys"][0]["alg"], "ES256");

    Ok(())
}

/// An imported private JWK becomes the first published key.
#[tokio::test]
async fn test_imported_key_is_published() -> Result<(), anyhow::Error> {
    let jwk = test_private_jwk(TEST_SEED_1, Some(TEST_KEY_ID_1))?;
    let server = TestJwksServer::spawn_with_vars(&[("JWK_PRIVATE_JSON", jwk.as_str())]).await?;

    let jwks = server.fetch_jwks().await?;

    jwks.assert_key_count(1).assert_has_kid(TEST_KEY_ID_1);
    assert_eq!(jwks["keys"][0]["x"], test_public_x(TEST_SEED_1)?.as_str());

    let token = server.issue_token(TEST_SUBJECT_BOB).await?;
    token.assert_valid_jwt().assert_signed_by(TEST_KEY_ID_1);

    Ok(())
}

/// An RSA private JWK imports as a PS512 key published with `n` and `e`,
/// and tokens it signs validate.
#[tokio::test]
async fn test_imported_rsa_key_signs_ps512() -> Result<(), anyhow::Error> {
    // Arrange
    let fixture: serde_json::Value = serde_json::from_str(TEST_RSA_PRIVATE_JWK)?;
    let server =
        TestJwksServer::spawn_with_vars(&[("JWK_PRIVATE_JSON", TEST_RSA_PRIVATE_JWK)]).await?;

    // Act
    let jwks = server.fetch_jwks().await?;
    let token = server.issue_token(TEST_SUBJECT_ALICE).await?;
    let response = server.ping(&token).await?;

    // Assert
    jwks.assert_key_count(1)
        .assert_has_kid(TEST_RSA_KEY_ID)
        .assert_no_private_parameters()
        .assert_well_formed();
    assert_eq!(jwks["keys"][0]["kty"], "RSA");
    assert_eq!(jwks["keys"][0]["alg"], "PS512");
    assert_eq!(jwks["keys"][0]["n"], fixture["n"]);
    assert_eq!(jwks["keys"][0]["e"], fixture["e"]);
    assert!(jwks["keys"][0].get("crv").is_none());

    token.assert_valid_jwt().assert_signed_by(TEST_RSA_KEY_ID);
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    Ok(())
}

/// A configured private JWK file that does not exist falls back to
/// `JWK_PRIVATE_JSON`.
#[tokio::test]
async fn test_missing_private_file_uses_inline_jwk() -> Result<(), anyhow::Error> {
    // Arrange
    let jwk = test_private_jwk(TEST_SEED_2, Some(TEST_KEY_ID_2))?;
    let missing = std::env::temp_dir().join("jwks-issuer-no-such-private-jwk.json");

    // Act
    let server = TestJwksServer::spawn_with_vars(&[
        ("JWK_PRIVATE_FILE", missing.to_string_lossy().as_ref()),
        ("JWK_PRIVATE_JSON", jwk.as_str()),
    ])
    .await?;

    // Assert
    assert_eq!(server.store().current_active_key()?.key_id, TEST_KEY_ID_2);
    server
        .fetch_jwks()
        .await?
        .assert_key_count(1)
        .assert_has_kid(TEST_KEY_ID_2);
    assert_eq!(
        server.fetch_jwks().await?["keys"][0]["x"],
        test_public_x(TEST_SEED_2)?.as_str()
    );

    Ok(())
}

/// The JWKS response body is identical across requests for one key set.
#[tokio::test]
async fn test_jwks_body_is_stable() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;
    server.publish_pending_key()?;

    let first = server.client().get(jwks_url(&server)).send().await?.bytes().await?;
    let second = server.client().get(jwks_url(&server)).send().await?.bytes().await?;

    assert_eq!(first, second);

    Ok(())
}
