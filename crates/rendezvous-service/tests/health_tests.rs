//! Health and metrics endpoint integration tests.
//!
//! Tests `/health` and `/metrics` using the `TestRendezvousServer` harness.

use rendezvous_test_utils::TestRendezvousServer;

/// Test that health endpoint returns 200 and healthy status.
#[tokio::test]
async fn test_health_endpoint_returns_200() -> Result<(), anyhow::Error> {
    let server = TestRendezvousServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["groups"], 0);

    Ok(())
}

/// Test that health endpoint returns JSON content type.
#[tokio::test]
async fn test_health_endpoint_returns_json() -> Result<(), anyhow::Error> {
    let server = TestRendezvousServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", server.url()))
        .send()
        .await?;

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok());

    assert!(
        content_type.is_some_and(|ct| ct.contains("application/json")),
        "Expected application/json content type, got {:?}",
        content_type
    );

    Ok(())
}

/// Test that the group count follows registrations.
#[tokio::test]
async fn test_health_counts_groups() -> Result<(), anyhow::Error> {
    let server = TestRendezvousServer::spawn().await?;
    let client = reqwest::Client::new();

    for name in ["a", "b"] {
        client
            .post(format!("{}/group", server.url()))
            .json(&serde_json::json!({"name": name, "appID": "app"}))
            .send()
            .await?
            .error_for_status()?;
    }

    let body: serde_json::Value = client
        .get(format!("{}/health", server.url()))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(body["groups"], 2);

    Ok(())
}

/// Test that non-existent routes return 404.
#[tokio::test]
async fn test_unknown_route_returns_404() -> Result<(), anyhow::Error> {
    let server = TestRendezvousServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/nonexistent", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), 404);

    Ok(())
}

/// Test that the metrics endpoint answers in Prometheus text format.
#[tokio::test]
async fn test_metrics_endpoint_returns_200() -> Result<(), anyhow::Error> {
    let server = TestRendezvousServer::spawn().await?;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/metrics", server.url()))
        .send()
        .await?;

    assert_eq!(response.status(), 200);

    Ok(())
}
