//! Rendezvous server lifecycle.
//!
//! The server owns the group repository and hosts three things: the signaling
//! subsystem, the relay subsystem and the Discovery API. They are acquired in
//! that order and released in reverse:
//!
//! ```text
//! start signaling -> start relay -> spawn TTL sweeper -> bind Discovery API
//!                                                              |
//!                    shutdown future fires / subsystem fault   v
//!                                                              |
//! shutdown signaling <- close relay <- stop Discovery <- stop sweeper
//! ```
//!
//! A failure at any step releases exactly what was acquired before it. There
//! is no degraded mode: a subsystem that cannot start, or that faults while
//! running, stops the whole server.
//!
//! Progress is published on a `watch` channel (see [`ServerState`]) so
//! callers can learn the bound Discovery address and observe shutdown.

use crate::config::Config;
use crate::errors::ServerError;
use crate::repositories::GroupRepository;
use crate::routes::{self, AppState};
use crate::subsystems::{
    HttpSignaling, RelayConfig, RelayLauncher, SignalingConfig, SignalingLauncher, UdpRelay,
};
use crate::tasks::{start_ttl_sweeper, TtlSweeper};
use crate::tls;
use metrics_exporter_prometheus::PrometheusHandle;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Lifecycle state of a [`RendezvousServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Serving { discovery_addr: SocketAddr },
    ShuttingDown,
    Stopped,
}

/// Owns the TTL sweeper task until it is stopped.
struct SweeperTask {
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweeperTask {
    fn spawn(sweeper: TtlSweeper, cancel_token: CancellationToken) -> Self {
        let handle = tokio::spawn(start_ttl_sweeper(Arc::new(sweeper), cancel_token.clone()));
        Self {
            cancel_token,
            handle: Some(handle),
        }
    }

    /// Cancel and wait for the task. Safe to call more than once.
    async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!(target: "rendezvous.server", error = %e, "TTL sweeper task ended abnormally");
            }
        }
    }
}

/// What ended the Serving phase.
#[derive(Clone, Copy)]
enum Trigger {
    Shutdown,
    Fault,
}

/// Composition root of the rendezvous service.
pub struct RendezvousServer {
    config: Config,
    repo: Arc<GroupRepository>,
    signaling: Arc<dyn SignalingLauncher>,
    relay: Arc<dyn RelayLauncher>,
    metrics_handle: PrometheusHandle,
    state_tx: watch::Sender<ServerState>,
}

impl RendezvousServer {
    /// Create a server with the bundled signaling and relay subsystems and an
    /// empty repository.
    pub fn new(config: Config, metrics_handle: PrometheusHandle) -> Self {
        let (state_tx, _) = watch::channel(ServerState::NotStarted);
        Self {
            config,
            repo: Arc::new(GroupRepository::new()),
            signaling: Arc::new(HttpSignaling::new()),
            relay: Arc::new(UdpRelay::new()),
            metrics_handle,
            state_tx,
        }
    }

    /// Replace the signaling and relay launchers.
    pub fn with_subsystems(
        mut self,
        signaling: Arc<dyn SignalingLauncher>,
        relay: Arc<dyn RelayLauncher>,
    ) -> Self {
        self.signaling = signaling;
        self.relay = relay;
        self
    }

    /// Serve an existing repository instead of an empty one.
    pub fn with_repository(mut self, repo: Arc<GroupRepository>) -> Self {
        self.repo = repo;
        self
    }

    pub fn repository(&self) -> Arc<GroupRepository> {
        Arc::clone(&self.repo)
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ServerState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Run the server until `shutdown` completes or a subsystem faults.
    ///
    /// # Errors
    ///
    /// - `Tls` if the certificate or key cannot be loaded
    /// - `SubsystemStartup` if signaling or relay cannot start
    /// - `Transport` if the Discovery API cannot bind or stops with an I/O error
    /// - `SubsystemFault` if a running subsystem cancelled the fault token
    ///
    /// In every case the subsystems that were started have been released by
    /// the time this returns.
    #[instrument(skip_all, name = "rendezvous.server.serve")]
    pub async fn serve<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        self.set_state(ServerState::Starting);
        let fault = CancellationToken::new();

        // Before any subsystem starts: nothing to release on failure.
        let discovery_tls = match tls::server_config_from_files(
            self.config.tls_cert_file.as_deref(),
            self.config.tls_key_file.as_deref(),
        )
        .await
        {
            Ok(discovery_tls) => discovery_tls,
            Err(e) => {
                error!(target: "rendezvous.server", error = %e, "Failed to load Discovery API TLS configuration");
                self.set_state(ServerState::Stopped);
                return Err(ServerError::Tls(e));
            }
        };

        info!(
            target: "rendezvous.server",
            signal_bind_address = %self.config.signal_bind_address,
            "Starting signaling"
        );
        let mut signaling = match self
            .signaling
            .start(&SignalingConfig::from_config(&self.config), fault.clone())
            .await
        {
            Ok(handle) => handle,
            Err(source) => {
                error!(target: "rendezvous.server", error = %source, "Failed to start signaling");
                self.set_state(ServerState::Stopped);
                return Err(ServerError::SubsystemStartup {
                    subsystem: "signaling",
                    source,
                });
            }
        };

        info!(
            target: "rendezvous.server",
            relay_address = %self.config.relay_address,
            "Starting relay"
        );
        let mut relay = match self
            .relay
            .start(&RelayConfig::from_config(&self.config), fault.clone())
            .await
        {
            Ok(handle) => handle,
            Err(source) => {
                error!(target: "rendezvous.server", error = %source, "Failed to start relay");
                self.set_state(ServerState::ShuttingDown);
                signaling.shutdown().await;
                self.set_state(ServerState::Stopped);
                return Err(ServerError::SubsystemStartup {
                    subsystem: "relay",
                    source,
                });
            }
        };

        let shutdown_token = CancellationToken::new();
        let mut sweeper = SweeperTask::spawn(
            TtlSweeper::new(
                Arc::clone(&self.repo),
                self.config.group_ttl,
                self.config.ttl_heartbeat,
            ),
            shutdown_token.child_token(),
        );

        let result = self
            .serve_discovery(shutdown, discovery_tls, &fault, &mut sweeper)
            .await;

        self.set_state(ServerState::ShuttingDown);
        shutdown_token.cancel();
        sweeper.stop().await;

        info!(target: "rendezvous.server", "Closing relay");
        relay.close().await;

        info!(target: "rendezvous.server", "Shutting down signaling");
        signaling.shutdown().await;

        self.set_state(ServerState::Stopped);
        info!(target: "rendezvous.server", "Rendezvous server stopped");

        result
    }

    /// Bind and serve the Discovery API until shutdown or fault. The sweeper
    /// is stopped before the listener starts draining.
    async fn serve_discovery<F>(
        &self,
        shutdown: F,
        tls_config: Option<Arc<rustls::ServerConfig>>,
        fault: &CancellationToken,
        sweeper: &mut SweeperTask,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(&self.config.disco_bind_address)
            .await
            .map_err(|e| {
                error!(
                    target: "rendezvous.server",
                    bind_address = %self.config.disco_bind_address,
                    error = %e,
                    "Failed to bind Discovery API"
                );
                ServerError::Transport(e)
            })?;
        let discovery_addr = listener.local_addr()?;

        let state = Arc::new(AppState {
            repo: Arc::clone(&self.repo),
        });
        let app = routes::build_routes(state, self.metrics_handle.clone());

        let tls_enabled = tls_config.is_some();
        let stop_discovery = CancellationToken::new();
        let server = tls::serve(listener, app, tls_config, stop_discovery.clone());
        tokio::pin!(server);
        tokio::pin!(shutdown);

        self.set_state(ServerState::Serving { discovery_addr });
        info!(
            target: "rendezvous.server",
            discovery_addr = %discovery_addr,
            tls = tls_enabled,
            "Discovery API listening"
        );

        let trigger = tokio::select! {
            result = &mut server => {
                // The listener stopped without being asked to.
                return result.map_err(|e| {
                    error!(target: "rendezvous.server", error = %e, "Discovery API failed");
                    ServerError::Transport(e)
                });
            }
            () = &mut shutdown => Trigger::Shutdown,
            () = fault.cancelled() => Trigger::Fault,
        };

        self.set_state(ServerState::ShuttingDown);
        match trigger {
            Trigger::Shutdown => {
                info!(target: "rendezvous.server", "Shutdown requested, stopping");
            }
            Trigger::Fault => {
                error!(target: "rendezvous.server", "Subsystem fault, stopping");
            }
        }

        sweeper.stop().await;

        stop_discovery.cancel();
        server.await.map_err(|e| {
            error!(target: "rendezvous.server", error = %e, "Discovery API failed during shutdown");
            ServerError::Transport(e)
        })?;
        info!(target: "rendezvous.server", "Discovery API stopped");

        match trigger {
            Trigger::Shutdown => Ok(()),
            Trigger::Fault => Err(ServerError::SubsystemFault),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweeper_task_stop_is_idempotent() {
        let repo = Arc::new(GroupRepository::new());
        let mut task = SweeperTask::spawn(
            TtlSweeper::new(repo, Duration::from_secs(60), Duration::from_secs(1)),
            CancellationToken::new(),
        );

        task.stop().await;
        assert!(task.handle.is_none());
        task.stop().await;
    }

    #[test]
    fn test_server_state_serving_carries_address() {
        let addr: SocketAddr = "127.0.0.1:1443".parse().unwrap();
        let state = ServerState::Serving {
            discovery_addr: addr,
        };
        assert_ne!(state, ServerState::Starting);
        assert!(matches!(state, ServerState::Serving { discovery_addr } if discovery_addr == addr));
    }
}
