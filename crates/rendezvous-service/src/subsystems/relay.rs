//! UDP relay subsystem.
//!
//! Answers STUN Binding requests so peers can learn their server-reflexive
//! address. An anonymous request (no USERNAME, no MESSAGE-INTEGRITY) gets a
//! plain Binding success. A request naming a USERNAME must be signed with
//! that user's long-term key; an unknown user, a missing signature or a bad
//! signature gets a 401 carrying the realm. Authenticated replies are signed
//! with the same key. Datagrams that are not Binding requests are ignored.

use super::stun::{self, Message};
use super::{RelayConfig, RelayHandle, RelayLauncher, SubsystemError};
use crate::observability::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use md5::{Digest, Md5};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_DATAGRAM_SIZE: usize = 1500;

/// Long-term credential key: `MD5(username:realm:password)`.
pub fn long_term_key(username: &str, realm: &str, password: &str) -> [u8; 16] {
    let digest = Md5::digest(format!("{username}:{realm}:{password}").as_bytes());
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest);
    key
}

/// Split `host:port`. IPv6 hosts must be bracketed.
fn parse_relay_address(addr: &str) -> Result<(String, u16), SubsystemError> {
    let invalid = || SubsystemError::InvalidAddress(format!("relay address '{addr}' is not host:port"));

    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || (host.contains(':') && !addr.starts_with('[')) {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;

    Ok((host.to_string(), port))
}

/// Bundled relay launcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct UdpRelay;

impl UdpRelay {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RelayLauncher for UdpRelay {
    async fn start(
        &self,
        config: &RelayConfig,
        fault: CancellationToken,
    ) -> Result<Box<dyn RelayHandle>, SubsystemError> {
        let handle = UdpRelayHandle::start(config, fault).await?;
        Ok(Box::new(handle))
    }
}

/// A running UDP relay.
#[derive(Debug)]
pub struct UdpRelayHandle {
    local_addr: SocketAddr,
    advertised_host: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl UdpRelayHandle {
    /// Validate, bind and spawn the receive loop.
    pub async fn start(
        config: &RelayConfig,
        fault: CancellationToken,
    ) -> Result<Self, SubsystemError> {
        let (advertised_host, port) = parse_relay_address(&config.addr)?;

        let username = config.credentials.username.trim();
        let password = config.credentials.password.expose_secret();
        if username.is_empty() || password.is_empty() {
            return Err(SubsystemError::InvalidCredentials(
                "relay username and password must not be empty".to_string(),
            ));
        }

        let users = HashMap::from([(
            username.to_string(),
            long_term_key(username, &config.realm, password),
        )]);

        let bind_addr = format!("0.0.0.0:{port}");
        let socket = UdpSocket::bind(&bind_addr)
            .await
            .map_err(|source| SubsystemError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let local_addr = socket.local_addr().map_err(|source| SubsystemError::Bind {
            addr: bind_addr,
            source,
        })?;

        info!(
            target: "rendezvous.subsystem.relay",
            local_addr = %local_addr,
            advertised_host = %advertised_host,
            realm = %config.realm,
            "Relay listening"
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_relay(
            socket,
            config.realm.clone(),
            users,
            cancel.clone(),
            fault,
        ));

        Ok(Self {
            local_addr,
            advertised_host,
            cancel,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Host part of the configured relay address.
    pub fn advertised_host(&self) -> &str {
        &self.advertised_host
    }
}

#[async_trait]
impl RelayHandle for UdpRelayHandle {
    async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(target: "rendezvous.subsystem.relay", error = %e, "Relay task ended abnormally");
            }
        }
        info!(target: "rendezvous.subsystem.relay", "Relay closed");
    }
}

impl Drop for UdpRelayHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_relay(
    socket: UdpSocket,
    realm: String,
    users: HashMap<String, [u8; 16]>,
    cancel: CancellationToken,
    fault: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, peer)) => {
                    let Some(datagram) = buf.get(..len) else { continue };
                    if let Some(reply) = handle_datagram(datagram, peer, &realm, &users) {
                        if let Err(e) = socket.send_to(&reply, peer).await {
                            warn!(target: "rendezvous.subsystem.relay", peer = %peer, error = %e, "Failed to send reply");
                        }
                    }
                }
                // ICMP port unreachable from a previous reply; not fatal.
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    debug!(target: "rendezvous.subsystem.relay", error = %e, "Ignoring connection reset");
                }
                Err(e) => {
                    error!(target: "rendezvous.subsystem.relay", error = %e, "Relay socket failed");
                    fault.cancel();
                    break;
                }
            }
        }
    }
}

/// Build the reply for one datagram, if any.
fn handle_datagram(
    datagram: &[u8],
    peer: SocketAddr,
    realm: &str,
    users: &HashMap<String, [u8; 16]>,
) -> Option<Bytes> {
    let Some(request) = Message::decode(datagram).filter(|m| m.message_type == stun::BINDING_REQUEST)
    else {
        metrics::record_relay_request("ignored");
        return None;
    };

    let signed = request.attribute(stun::ATTR_MESSAGE_INTEGRITY).is_some();
    let reply = match (request.username(), signed) {
        (None, false) => stun::binding_success(request.transaction_id, peer).encode(),
        (None, true) => {
            debug!(target: "rendezvous.subsystem.relay", peer = %peer, "Signed request without a username");
            return Some(reject(&request, realm));
        }
        (Some(username), _) => match users.get(username) {
            None => {
                debug!(target: "rendezvous.subsystem.relay", peer = %peer, "Unknown relay user");
                return Some(reject(&request, realm));
            }
            Some(key) if stun::verify_integrity(datagram, key) => {
                stun::binding_success(request.transaction_id, peer).encode_with_integrity(key)
            }
            Some(_) => {
                debug!(
                    target: "rendezvous.subsystem.relay",
                    peer = %peer,
                    signed = signed,
                    "Relay user failed the integrity check"
                );
                return Some(reject(&request, realm));
            }
        },
    };

    metrics::record_relay_request("binding");
    Some(reply)
}

fn reject(request: &Message, realm: &str) -> Bytes {
    metrics::record_relay_request("unauthorized");
    stun::unauthorized(request.transaction_id, realm).encode()
}
