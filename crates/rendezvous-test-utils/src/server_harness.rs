//! Test server harness for E2E testing
//!
//! Provides `TestRendezvousServer` for spawning a real `RendezvousServer`
//! in tests. Signaling and relay are replaced by the mocks from
//! [`crate::mock_subsystems`] so tests do not compete for fixed ports.

use crate::mock_subsystems::{EventLog, MockRelay, MockSignaling};
use metrics_exporter_prometheus::PrometheusBuilder;
use rendezvous_service::config::Config;
use rendezvous_service::errors::ServerError;
use rendezvous_service::repositories::GroupRepository;
use rendezvous_service::server::{RendezvousServer, ServerState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

/// Environment used for every test server. The Discovery API binds an
/// ephemeral loopback port.
pub fn test_vars() -> HashMap<String, String> {
    HashMap::from([
        ("DISCO_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("SIGNAL_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("RELAY_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("RELAY_USERNAME".to_string(), "test-user".to_string()),
        ("RELAY_PASSWORD".to_string(), "test-password".to_string()),
        ("SIGNAL_REALM".to_string(), "test-realm".to_string()),
    ])
}

/// Test harness for spawning the rendezvous server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestRendezvousServer::spawn().await?;
///     let client = reqwest::Client::new();
///
///     let response = client
///         .get(&format!("{}/health", server.url()))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRendezvousServer {
    addr: SocketAddr,
    config: Config,
    repo: Arc<GroupRepository>,
    events: EventLog,
    signaling: Arc<MockSignaling>,
    relay: Arc<MockRelay>,
    state_rx: watch::Receiver<ServerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl TestRendezvousServer {
    /// Spawn a server with the default test environment.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(test_vars()).await
    }

    /// Spawn a server with `overrides` applied on top of [`test_vars`].
    ///
    /// The server will:
    /// - Start mock signaling and relay
    /// - Spawn the TTL sweeper
    /// - Bind the Discovery API to a random available port
    ///
    /// Returns once the Discovery API is serving.
    pub async fn spawn_with_vars(overrides: HashMap<String, String>) -> Result<Self, anyhow::Error> {
        let mut vars = test_vars();
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let events = EventLog::default();
        let signaling = Arc::new(MockSignaling::new(events.clone()));
        let relay = Arc::new(MockRelay::new(events.clone()));

        // A recorder per server: handles can be built freely, only installing
        // a global recorder is once-per-process.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        let server = RendezvousServer::new(config.clone(), metrics_handle)
            .with_subsystems(signaling.clone(), relay.clone());
        let repo = server.repository();
        let mut state_rx = server.subscribe();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(async move {
            let _ = shutdown_rx.await;
        }));

        let state = *state_rx
            .wait_for(|state| {
                matches!(state, ServerState::Serving { .. } | ServerState::Stopped)
            })
            .await
            .map_err(|e| anyhow::anyhow!("Server state channel closed: {}", e))?;

        let ServerState::Serving { discovery_addr } = state else {
            let result = handle.await?;
            return Err(anyhow::anyhow!("Server stopped during startup: {:?}", result));
        };

        Ok(Self {
            addr: discovery_addr,
            config,
            repo,
            events,
            signaling,
            relay,
            state_rx,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the Discovery API. `https` when the server was
    /// given a certificate.
    pub fn url(&self) -> String {
        let scheme = if self.config.tls_cert_file.is_some() {
            "https"
        } else {
            "http"
        };
        format!("{scheme}://{}", self.addr)
    }

    /// Get the Discovery API socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The repository the server is serving.
    pub fn repository(&self) -> Arc<GroupRepository> {
        Arc::clone(&self.repo)
    }

    /// Subsystem lifecycle events recorded so far.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn signaling(&self) -> &MockSignaling {
        &self.signaling
    }

    pub fn relay(&self) -> &MockRelay {
        &self.relay
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state_rx.borrow()
    }

    /// Wait until the server has stopped on its own (for example after a
    /// subsystem fault) and return its result.
    pub async fn wait_stopped(mut self) -> Result<Result<(), ServerError>, anyhow::Error> {
        self.join().await
    }

    /// Trigger graceful shutdown and return the server's result.
    pub async fn shutdown(mut self) -> Result<Result<(), ServerError>, anyhow::Error> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.join().await
    }

    async fn join(&mut self) -> Result<Result<(), ServerError>, anyhow::Error> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow::anyhow!("Server already stopped"))?;
        Ok(handle.await?)
    }
}

impl Drop for TestRendezvousServer {
    fn drop(&mut self) {
        // Abort the server task to ensure immediate cleanup when the test
        // completes without calling shutdown().
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_subsystems::SubsystemEvent;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let server = TestRendezvousServer::spawn().await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.addr().port() > 0);
        assert!(matches!(server.state(), ServerState::Serving { .. }));

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);

        let body: serde_json::Value = response.json().await?;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["groups"], 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_server_passes_config_to_subsystems() -> Result<(), anyhow::Error> {
        let server = TestRendezvousServer::spawn().await?;

        let signaling = server.signaling().last_config().unwrap();
        assert_eq!(signaling.realm, "test-realm");

        let relay = server.relay().last_config().unwrap();
        assert_eq!(relay.credentials.username, "test-user");
        assert_eq!(relay.realm, "test-realm");

        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_releases_subsystems() -> Result<(), anyhow::Error> {
        let server = TestRendezvousServer::spawn().await?;
        let events = server.events().clone();

        server.shutdown().await??;

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
}
