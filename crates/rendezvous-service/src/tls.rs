//! TLS for the HTTP listeners.
//!
//! Loads a PEM certificate chain and private key into a rustls server
//! configuration, and serves an axum router over either plain TCP or TLS.
//! The Discovery API and the signaling host share this code.

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Errors loading the certificate and key.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("certificate and key files must be configured together")]
    IncompletePair,

    #[error("cannot read {kind} file '{path}': {source}")]
    Read {
        kind: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("invalid {kind} file '{path}': {message}")]
    Pem {
        kind: &'static str,
        path: String,
        message: String,
    },

    #[error("certificate and key rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build a server configuration from an optional cert/key pair.
///
/// `Ok(None)` when neither file is configured.
pub async fn server_config_from_files(
    cert_file: Option<&str>,
    key_file: Option<&str>,
) -> Result<Option<Arc<ServerConfig>>, TlsError> {
    match (cert_file, key_file) {
        (Some(cert), Some(key)) => load_server_config(cert, key).await.map(Some),
        (None, None) => Ok(None),
        _ => Err(TlsError::IncompletePair),
    }
}

/// Load a PEM certificate chain and private key.
pub async fn load_server_config(
    cert_file: &str,
    key_file: &str,
) -> Result<Arc<ServerConfig>, TlsError> {
    let cert_pem = read_pem("certificate", cert_file).await?;
    let key_pem = read_pem("key", key_file).await?;

    let certs = CertificateDer::pem_slice_iter(&cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Pem {
            kind: "certificate",
            path: cert_file.to_string(),
            message: e.to_string(),
        })?;
    if certs.is_empty() {
        return Err(TlsError::Pem {
            kind: "certificate",
            path: cert_file.to_string(),
            message: "no certificates found".to_string(),
        });
    }

    let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| TlsError::Pem {
        kind: "key",
        path: key_file.to_string(),
        message: e.to_string(),
    })?;

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

async fn read_pem(kind: &'static str, path: &str) -> Result<Vec<u8>, TlsError> {
    tokio::fs::read(path).await.map_err(|source| TlsError::Read {
        kind,
        path: path.to_string(),
        source,
    })
}

/// Serve `app` on `listener` until `shutdown` is cancelled, over TLS when a
/// configuration is given.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    tls: Option<Arc<ServerConfig>>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    match tls {
        None => {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }
        Some(config) => {
            serve_tls(listener, app, TlsAcceptor::from(config), shutdown).await;
            Ok(())
        }
    }
}

/// Accept loop for TLS connections. Each connection runs on its own task
/// and is asked to finish gracefully on shutdown.
async fn serve_tls(
    listener: TcpListener,
    app: Router,
    acceptor: TlsAcceptor,
    shutdown: CancellationToken,
) {
    let connections = TaskTracker::new();

    loop {
        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    // Usually EMFILE; back off instead of spinning.
                    warn!(target: "rendezvous.tls", error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        let shutdown = shutdown.clone();

        connections.spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!(target: "rendezvous.tls", peer = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let builder = Builder::new(TokioExecutor::new());
            let connection = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(connection);

            let finished = tokio::select! {
                result = connection.as_mut() => Some(result),
                () = shutdown.cancelled() => None,
            };
            let result = match finished {
                Some(result) => result,
                None => {
                    connection.as_mut().graceful_shutdown();
                    connection.await
                }
            };

            if let Err(e) = result {
                debug!(target: "rendezvous.tls", peer = %peer, error = %e, "Connection closed with error");
            }
        });
    }

    drop(listener);
    connections.close();
    connections.wait().await;
}
