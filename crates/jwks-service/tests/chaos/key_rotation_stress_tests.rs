//! Concurrency tests: readers racing rotations.
//!
//! Readers must never observe an empty verifiable set or a missing
//! active key, no matter how rotations interleave.

use jwks_test_utils::*;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

const ROTATIONS: usize = 50;
const READERS: usize = 8;

/// Store readers never see zero verifiable keys during promotions.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_store_readers_during_rotations() -> Result<(), anyhow::Error> {
    // Arrange
    let server = TestJwksServer::spawn().await?;
    let store = Arc::clone(server.store());
    let done = Arc::new(AtomicBool::new(false));
    let reads = Arc::new(AtomicUsize::new(0));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let store = Arc::clone(&store);
            let done = Arc::clone(&done);
            let reads = Arc::clone(&reads);
            tokio::spawn(async move {
                let mut violations = 0usize;
                loop {
                    let now = chrono::Utc::now();
                    if store.all_verifiable_keys(now).is_empty() {
                        violations += 1;
                    }
                    if store.current_active_key().is_err() {
                        violations += 1;
                    }
                    reads.fetch_add(1, Ordering::Relaxed);
                    if done.load(Ordering::Acquire) {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                violations
            })
        })
        .collect();

    // Act
    for _ in 0..ROTATIONS {
        server.rotate_keys()?;
        tokio::task::yield_now().await;
    }
    done.store(true, Ordering::Release);

    // Assert
    for reader in readers {
        assert_eq!(reader.await?, 0, "reader saw an empty key set");
    }
    assert!(reads.load(Ordering::Relaxed) >= READERS);
    assert_eq!(
        store.all_verifiable_keys(chrono::Utc::now()).len(),
        ROTATIONS + 1
    );

    Ok(())
}

/// Concurrent JWKS fetches during rotations always succeed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_jwks_fetches_during_rotations() -> Result<(), anyhow::Error> {
    // Arrange
    let server = Arc::new(TestJwksServer::spawn().await?);
    let done = Arc::new(AtomicBool::new(false));

    let fetchers: Vec<_> = (0..4)
        .map(|_| {
            let server = Arc::clone(&server);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                let mut fetched = 0usize;
                while !done.load(Ordering::Acquire) {
                    let response = server
                        .client()
                        .get(format!("{}/.well-known/jwks.json", server.url()))
                        .send()
                        .await?;
                    anyhow::ensure!(
                        response.status() == StatusCode::OK,
                        "JWKS returned {}",
                        response.status()
                    );
                    let jwks: serde_json::Value = response.json().await?;
                    let count = jwks["keys"].as_array().map_or(0, Vec::len);
                    anyhow::ensure!(count >= 1, "JWKS was empty");
                    fetched += 1;
                }
                Ok::<usize, anyhow::Error>(fetched)
            })
        })
        .collect();

    // Act
    for _ in 0..20 {
        server.rotate_keys()?;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    done.store(true, Ordering::Release);

    // Assert
    for fetcher in fetchers {
        fetcher.await??;
    }
    server.fetch_jwks().await?.assert_key_count(21);

    Ok(())
}

/// Tokens issued while rotations run all validate afterwards.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tokens_issued_during_rotations_stay_valid() -> Result<(), anyhow::Error> {
    let server = Arc::new(TestJwksServer::spawn().await?);

    let issuer = {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            let mut tokens = Vec::new();
            for i in 0..20 {
                tokens.push(server.issue_token(&format!("uid-{i}")).await?);
            }
            Ok::<Vec<String>, anyhow::Error>(tokens)
        })
    };

    for _ in 0..10 {
        server.rotate_keys()?;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let tokens = issuer.await??;
    for token in &tokens {
        assert_eq!(server.ping(token).await?.status(), StatusCode::OK);
    }

    Ok(())
}
