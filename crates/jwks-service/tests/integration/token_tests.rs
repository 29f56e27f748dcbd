//! Integration tests for token issuance and Bearer validation.

use jwks_test_utils::*;
use reqwest::header::WWW_AUTHENTICATE;
use reqwest::StatusCode;

/// A token issued over HTTP validates at /api/v1/ping.
#[tokio::test]
async fn test_issue_then_ping() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestJwksServer::spawn().await?;
    let active = server.store().current_active_key()?;

    // Act
    let token = server.issue_token(TEST_SUBJECT_ALICE).await?;
    let response = server.ping(&token).await?;

    // Assert
    token
        .assert_valid_jwt()
        .assert_signed_by(&active.key_id)
        .assert_for_subject(TEST_SUBJECT_ALICE)
        .assert_expires_in(30);

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["ok"], true);
    assert_eq!(body["message"], "Validation successful");
    assert_eq!(body["kid"], active.key_id.as_str());
    assert_eq!(body["claims"]["sub"], TEST_SUBJECT_ALICE);
    assert_eq!(body["claims"]["iss"], TEST_ISSUER);
    assert_eq!(body["claims"]["aud"], TEST_AUDIENCE);

    Ok(())
}

/// The token response describes the Bearer credential.
#[tokio::test]
async fn test_token_response_shape() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn_with_vars(&[("TOKEN_LIFETIME_SECONDS", "120")]).await?;

    let response = server
        .client()
        .post(format!("{}/api/v1/tokens", server.url()))
        .json(&serde_json::json!({ "sub": TEST_SUBJECT_BOB }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 120);
    let token = body["access_token"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing access_token"))?
        .to_string();
    token.assert_expires_in(120);

    Ok(())
}

/// Blank subjects are rejected before signing.
#[tokio::test]
async fn test_blank_subject_rejected() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;

    let response = server
        .client()
        .post(format!("{}/api/v1/tokens", server.url()))
        .json(&serde_json::json!({ "sub": "   " }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    Ok(())
}

/// Oversized subjects are rejected.
#[tokio::test]
async fn test_oversized_subject_rejected() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;

    let response = server
        .client()
        .post(format!("{}/api/v1/tokens", server.url()))
        .json(&serde_json::json!({ "sub": "x".repeat(257) }))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    Ok(())
}

/// A request without a Bearer token gets a generic 401.
#[tokio::test]
async fn test_ping_without_token_is_unauthorized() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;

    let response = server
        .client()
        .get(format!("{}/api/v1/ping", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(WWW_AUTHENTICATE));
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"]["code"], "INVALID_TOKEN");

    Ok(())
}

/// Garbage and foreign tokens get the same response body.
#[tokio::test]
async fn test_rejections_do_not_leak_reason() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestJwksServer::spawn().await?;
    let other = TestJwksServer::spawn().await?;
    let foreign = other.issue_token(TEST_SUBJECT_ALICE).await?;

    // Act
    let garbage = server.ping("not-a-jwt").await?;
    let unknown_kid = server.ping(&foreign).await?;

    // Assert
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_kid.status(), StatusCode::UNAUTHORIZED);
    let garbage: serde_json::Value = garbage.json().await?;
    let unknown_kid: serde_json::Value = unknown_kid.json().await?;
    assert_eq!(garbage, unknown_kid);

    Ok(())
}

/// A token whose signature was tampered with is rejected.
#[tokio::test]
async fn test_tampered_token_rejected() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn().await?;
    let token = server.issue_token(TEST_SUBJECT_ALICE).await?;

    let (signing_input, _) = token
        .rsplit_once('.')
        .ok_or_else(|| anyhow::anyhow!("token has no signature"))?;
    let tampered = format!("{signing_input}.AAAA");

    let response = server.ping(&tampered).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

/// Tokens signed with ES256 keys validate too.
#[tokio::test]
async fn test_es256_tokens_validate() -> Result<(), anyhow::Error> {
    let server = TestJwksServer::spawn_with_vars(&[("KEY_ALGORITHM", "ES256")]).await?;

    let token = server.issue_token(TEST_SUBJECT_BOB).await?;
    let response = server.ping(&token).await?;

    assert_eq!(response.status(), StatusCode::OK);

    Ok(())
}
