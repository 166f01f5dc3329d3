//! Rendezvous Service
//!
//! Hosts the Discovery API, the signaling subsystem and the relay subsystem
//! in one process.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Start signaling, then relay, then the TTL sweeper
//! 4. Serve the Discovery API until SIGINT/SIGTERM or a subsystem fault

use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;
use rendezvous_service::config::Config;
use rendezvous_service::server::RendezvousServer;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rendezvous_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Rendezvous Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        disco_bind_address = %config.disco_bind_address,
        signal_bind_address = %config.signal_bind_address,
        relay_address = %config.relay_address,
        realm = %config.realm,
        group_ttl_seconds = config.group_ttl.as_secs(),
        ttl_heartbeat_seconds = config.ttl_heartbeat.as_secs(),
        "Configuration loaded successfully"
    );

    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;
    info!("Prometheus metrics recorder initialized");

    let drain_seconds = config.drain_seconds;
    let server = RendezvousServer::new(config, prometheus_handle);

    server
        .serve(shutdown_signal(drain_seconds))
        .await
        .map_err(|e| {
            error!("Rendezvous server failed: {}", e);
            e
        })?;

    info!("Rendezvous Service shutdown complete");

    Ok(())
}

/// Completes on SIGINT or SIGTERM, after the configured drain period.
async fn shutdown_signal(drain_seconds: u64) {
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

    if drain_seconds > 0 {
        warn!("Draining for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (DRAIN_SECONDS=0)");
    }
}
