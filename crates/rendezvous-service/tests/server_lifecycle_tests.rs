//! Server lifecycle integration tests.
//!
//! Startup order, release order on every exit path, fault-triggered shutdown
//! and the TTL sweeper running inside a live server.

use metrics_exporter_prometheus::PrometheusBuilder;
use rendezvous_service::config::Config;
use rendezvous_service::errors::ServerError;
use rendezvous_service::models::Group;
use rendezvous_service::server::{RendezvousServer, ServerState};
use rendezvous_test_utils::{
    test_vars, EventLog, MockRelay, MockSignaling, SubsystemEvent, TestRendezvousServer,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn server_with(
    vars: HashMap<String, String>,
    signaling: Arc<MockSignaling>,
    relay: Arc<MockRelay>,
) -> Result<RendezvousServer, anyhow::Error> {
    let config = Config::from_vars(&vars)?;
    let handle = PrometheusBuilder::new().build_recorder().handle();
    Ok(RendezvousServer::new(config, handle).with_subsystems(signaling, relay))
}

/// Subsystems start in order and are released in reverse.
#[tokio::test]
async fn test_graceful_shutdown_releases_in_reverse_order() -> Result<(), anyhow::Error> {
    let server = TestRendezvousServer::spawn().await?;
    let events = server.events().clone();

    assert_eq!(
        events.events(),
        vec![SubsystemEvent::SignalingStarted, SubsystemEvent::RelayStarted]
    );

    let result = server.shutdown().await?;

    assert!(result.is_ok());
    assert_eq!(
        events.events(),
        vec![
            SubsystemEvent::SignalingStarted,
            SubsystemEvent::RelayStarted,
            SubsystemEvent::RelayClosed,
            SubsystemEvent::SignalingShutdown,
        ]
    );

    Ok(())
}

/// A signaling failure stops startup before the relay is touched.
#[tokio::test]
async fn test_signaling_failure_is_fatal() -> Result<(), anyhow::Error> {
    let log = EventLog::default();
    let signaling = Arc::new(MockSignaling::failing(log.clone()));
    let relay = Arc::new(MockRelay::new(log.clone()));

    let server = server_with(test_vars(), signaling.clone(), relay.clone())?;
    let state_rx = server.subscribe();

    let result = server.serve(std::future::pending()).await;

    assert!(matches!(
        result,
        Err(ServerError::SubsystemStartup {
            subsystem: "signaling",
            ..
        })
    ));
    assert_eq!(signaling.start_count(), 1);
    assert_eq!(relay.start_count(), 0);
    assert!(log.events().is_empty());
    assert_eq!(*state_rx.borrow(), ServerState::Stopped);

    Ok(())
}

/// A relay failure releases the already-started signaling subsystem.
#[tokio::test]
async fn test_relay_failure_releases_signaling() -> Result<(), anyhow::Error> {
    let log = EventLog::default();
    let signaling = Arc::new(MockSignaling::new(log.clone()));
    let relay = Arc::new(MockRelay::failing(log.clone()));

    let server = server_with(test_vars(), signaling, relay)?;
    let state_rx = server.subscribe();

    let result = server.serve(std::future::pending()).await;

    match result {
        Err(ServerError::SubsystemStartup { subsystem, source }) => {
            assert_eq!(subsystem, "relay");
            assert!(source.to_string().starts_with("Invalid address"));
        }
        other => anyhow::bail!("expected relay startup failure, got {:?}", other),
    }
    assert_eq!(
        log.events(),
        vec![
            SubsystemEvent::SignalingStarted,
            SubsystemEvent::SignalingShutdown
        ]
    );
    assert_eq!(*state_rx.borrow(), ServerState::Stopped);

    Ok(())
}

/// A Discovery API bind failure releases both subsystems.
#[tokio::test]
async fn test_discovery_bind_failure_releases_subsystems() -> Result<(), anyhow::Error> {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await?;

    let log = EventLog::default();
    let mut vars = test_vars();
    vars.insert(
        "DISCO_BIND_ADDRESS".to_string(),
        occupied.local_addr()?.to_string(),
    );
    let server = server_with(
        vars,
        Arc::new(MockSignaling::new(log.clone())),
        Arc::new(MockRelay::new(log.clone())),
    )?;

    let result = server.serve(std::future::pending()).await;

    assert!(matches!(result, Err(ServerError::Transport(_))));
    assert_eq!(
        log.events(),
        vec![
            SubsystemEvent::SignalingStarted,
            SubsystemEvent::RelayStarted,
            SubsystemEvent::RelayClosed,
            SubsystemEvent::SignalingShutdown,
        ]
    );

    Ok(())
}

/// A runtime fault in a subsystem shuts the whole server down.
#[tokio::test]
async fn test_subsystem_fault_stops_server() -> Result<(), anyhow::Error> {
    let server = TestRendezvousServer::spawn().await?;
    let events = server.events().clone();
    let url = server.url();

    assert!(server.relay().trigger_fault());

    let result = tokio::time::timeout(Duration::from_secs(5), server.wait_stopped()).await??;

    assert!(matches!(result, Err(ServerError::SubsystemFault)));
    assert_eq!(
        events.events(),
        vec![
            SubsystemEvent::SignalingStarted,
            SubsystemEvent::RelayStarted,
            SubsystemEvent::RelayClosed,
            SubsystemEvent::SignalingShutdown,
        ]
    );
    assert!(
        reqwest::get(format!("{url}/health")).await.is_err(),
        "Discovery API should be closed"
    );

    Ok(())
}

/// The server's state channel ends in Stopped after shutdown.
#[tokio::test]
async fn test_state_reaches_stopped() -> Result<(), anyhow::Error> {
    let log = EventLog::default();
    let server = server_with(
        test_vars(),
        Arc::new(MockSignaling::new(log.clone())),
        Arc::new(MockRelay::new(log)),
    )?;
    let mut state_rx = server.subscribe();
    assert_eq!(*state_rx.borrow(), ServerState::NotStarted);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(server.serve(async move {
        let _ = rx.await;
    }));

    let serving = *state_rx
        .wait_for(|state| matches!(state, ServerState::Serving { .. }))
        .await?;
    let ServerState::Serving { discovery_addr } = serving else {
        anyhow::bail!("expected Serving, got {:?}", serving);
    };
    assert!(discovery_addr.ip().is_loopback());

    let _ = tx.send(());
    task.await??;

    assert_eq!(*state_rx.borrow(), ServerState::Stopped);

    Ok(())
}

/// Groups that stop being refreshed are evicted by the running server.
#[tokio::test]
async fn test_stale_groups_are_evicted() -> Result<(), anyhow::Error> {
    let server = TestRendezvousServer::spawn_with_vars(HashMap::from([
        ("GROUP_TTL_SECONDS".to_string(), "1".to_string()),
        ("TTL_HEARTBEAT_SECONDS".to_string(), "1".to_string()),
    ]))
    .await?;
    let repo = server.repository();

    let id = repo.set(Group::new("short-lived", "app", vec![]))?;

    let mut evicted = false;
    for _ in 0..60 {
        if repo.get(&id).is_err() {
            evicted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(evicted, "group should be evicted once its TTL has passed");

    server.shutdown().await??;

    Ok(())
}

fn write_pem(contents: &str) -> Result<String, anyhow::Error> {
    let path = std::env::temp_dir().join(format!("rendezvous-{}.pem", uuid::Uuid::new_v4()));
    std::fs::write(&path, contents)?;
    Ok(path.display().to_string())
}

/// With a certificate configured the Discovery API only speaks HTTPS.
#[tokio::test]
async fn test_discovery_serves_https_with_certificate() -> Result<(), anyhow::Error> {
    let certified = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()])?;
    let cert_file = write_pem(&certified.cert.pem())?;
    let key_file = write_pem(&certified.key_pair.serialize_pem())?;

    let server = TestRendezvousServer::spawn_with_vars(HashMap::from([
        ("TLS_CERT_FILE".to_string(), cert_file.clone()),
        ("TLS_KEY_FILE".to_string(), key_file.clone()),
    ]))
    .await?;
    let url = server.url();
    assert!(url.starts_with("https://"));

    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()?;
    let response = client.get(format!("{url}/health")).send().await?;
    assert_eq!(response.status(), 200);

    assert!(
        reqwest::get(format!("http://{}/health", server.addr()))
            .await
            .is_err(),
        "plaintext requests must not be served"
    );

    server.shutdown().await??;
    std::fs::remove_file(cert_file)?;
    std::fs::remove_file(key_file)?;

    Ok(())
}

/// An unusable certificate stops startup before any subsystem starts.
#[tokio::test]
async fn test_invalid_certificate_fails_before_subsystems() -> Result<(), anyhow::Error> {
    let cert_file = write_pem("not a certificate")?;
    let key_file = write_pem("not a key")?;

    let log = EventLog::default();
    let signaling = Arc::new(MockSignaling::new(log.clone()));
    let relay = Arc::new(MockRelay::new(log.clone()));
    let mut vars = test_vars();
    vars.insert("TLS_CERT_FILE".to_string(), cert_file.clone());
    vars.insert("TLS_KEY_FILE".to_string(), key_file.clone());

    let server = server_with(vars, signaling.clone(), relay.clone())?;
    let state_rx = server.subscribe();

    let result = server.serve(std::future::pending()).await;

    assert!(matches!(result, Err(ServerError::Tls(_))));
    assert_eq!(signaling.start_count(), 0);
    assert_eq!(relay.start_count(), 0);
    assert!(log.events().is_empty());
    assert_eq!(*state_rx.borrow(), ServerState::Stopped);

    std::fs::remove_file(cert_file)?;
    std::fs::remove_file(key_file)?;

    Ok(())
}
