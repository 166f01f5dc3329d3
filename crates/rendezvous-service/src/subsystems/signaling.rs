//! HTTP signaling host.
//!
//! Binds the signaling address and serves `GET /realm` so peers can confirm
//! which realm this rendezvous server belongs to. When a certificate and key
//! are configured the listener only speaks TLS; they are loaded before
//! anything is bound.

use super::{SignalingConfig, SignalingHandle, SignalingLauncher, SubsystemError};
use crate::tls;
use async_trait::async_trait;
use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Response body for `GET /realm`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RealmResponse {
    pub realm: String,
    pub tls: bool,
}

/// Bundled signaling launcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpSignaling;

impl HttpSignaling {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignalingLauncher for HttpSignaling {
    async fn start(
        &self,
        config: &SignalingConfig,
        fault: CancellationToken,
    ) -> Result<Box<dyn SignalingHandle>, SubsystemError> {
        let handle = HttpSignalingHandle::start(config, fault).await?;
        Ok(Box::new(handle))
    }
}

/// A running signaling host.
#[derive(Debug)]
pub struct HttpSignalingHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

async fn realm_handler(State(info): State<Arc<RealmResponse>>) -> Json<RealmResponse> {
    Json(info.as_ref().clone())
}

impl HttpSignalingHandle {
    /// Load TLS material, bind, and spawn the listener.
    pub async fn start(
        config: &SignalingConfig,
        fault: CancellationToken,
    ) -> Result<Self, SubsystemError> {
        let tls_config =
            tls::server_config_from_files(config.cert_file.as_deref(), config.key_file.as_deref())
                .await?;
        let tls_enabled = tls_config.is_some();

        let listener =
            TcpListener::bind(&config.addr)
                .await
                .map_err(|source| SubsystemError::Bind {
                    addr: config.addr.clone(),
                    source,
                })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| SubsystemError::Bind {
                addr: config.addr.clone(),
                source,
            })?;

        info!(
            target: "rendezvous.subsystem.signaling",
            local_addr = %local_addr,
            realm = %config.realm,
            tls = tls_enabled,
            "Signaling listening"
        );

        let app = Router::new()
            .route("/realm", get(realm_handler))
            .with_state(Arc::new(RealmResponse {
                realm: config.realm.clone(),
                tls: tls_enabled,
            }));

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = tls::serve(listener, app, tls_config, shutdown).await {
                error!(target: "rendezvous.subsystem.signaling", error = %e, "Signaling server failed");
                fault.cancel();
            }
        });

        Ok(Self {
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl SignalingHandle for HttpSignalingHandle {
    async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(target: "rendezvous.subsystem.signaling", error = %e, "Signaling task ended abnormally");
            }
        }
        info!(target: "rendezvous.subsystem.signaling", "Signaling stopped");
    }
}

impl Drop for HttpSignalingHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
