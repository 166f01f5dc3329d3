//! Signaling and relay subsystems.
//!
//! The rendezvous server hosts two collaborators next to the Discovery API:
//! a signaling host peers use to exchange connection metadata, and a relay
//! that helps peers behind NATs learn their reflexive address. Both are
//! started through launcher traits so the server lifecycle can be exercised
//! with mocks; the bundled implementations are [`HttpSignaling`] and
//! [`UdpRelay`].
//!
//! A launcher receives a fault token. Cancelling it tells the server that the
//! subsystem failed at runtime and the whole process must shut down.

pub mod relay;
pub mod signaling;
pub mod stun;

pub use relay::UdpRelay;
pub use signaling::HttpSignaling;

use crate::config::{Config, RelayCredentials};
use crate::tls::TlsError;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Subsystem startup errors.
#[derive(Debug, Error)]
pub enum SubsystemError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] TlsError),
}

/// Parameters for the signaling subsystem.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub addr: String,
    pub realm: String,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
}

impl SignalingConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            addr: config.signal_bind_address.clone(),
            realm: config.realm.clone(),
            cert_file: config.tls_cert_file.clone(),
            key_file: config.tls_key_file.clone(),
        }
    }
}

/// Parameters for the relay subsystem.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// `host:port`. The port is bound on all interfaces.
    pub addr: String,
    pub credentials: RelayCredentials,
    pub realm: String,
}

impl RelayConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            addr: config.relay_address.clone(),
            credentials: config.relay_credentials.clone(),
            realm: config.realm.clone(),
        }
    }
}

/// Starts the signaling subsystem.
#[async_trait]
pub trait SignalingLauncher: Send + Sync {
    /// Bind and start serving in the background.
    ///
    /// Nothing is left running when this returns an error.
    async fn start(
        &self,
        config: &SignalingConfig,
        fault: CancellationToken,
    ) -> Result<Box<dyn SignalingHandle>, SubsystemError>;
}

/// A running signaling subsystem.
#[async_trait]
pub trait SignalingHandle: Send {
    /// Stop serving and wait for the listener to exit.
    async fn shutdown(&mut self);
}

/// Starts the relay subsystem.
#[async_trait]
pub trait RelayLauncher: Send + Sync {
    /// Validate the address and credentials, bind, and start answering.
    ///
    /// Nothing is left running when this returns an error.
    async fn start(
        &self,
        config: &RelayConfig,
        fault: CancellationToken,
    ) -> Result<Box<dyn RelayHandle>, SubsystemError>;
}

/// A running relay subsystem.
#[async_trait]
pub trait RelayHandle: Send {
    /// Stop answering and release the socket.
    async fn close(&mut self);
}
