//! Rendezvous service models.
//!
//! Contains the data types exchanged over the Discovery API and stored in the
//! group registry. Field names on the wire are camelCase to match the
//! existing peer SDKs.

use serde::{Deserialize, Serialize};

/// A peer identity belonging to a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Hex-encoded public key identifying the peer.
    #[serde(rename = "publicKey", default)]
    pub public_key: String,

    /// Network address the peer can be reached at.
    #[serde(default)]
    pub address: String,

    /// Human readable display name.
    #[serde(default)]
    pub moniker: String,
}

impl Peer {
    /// Create a new peer record.
    pub fn new(
        public_key: impl Into<String>,
        address: impl Into<String>,
        moniker: impl Into<String>,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            address: address.into(),
            moniker: moniker.into(),
        }
    }
}

/// A named, application-scoped collection of peers intending to form a mesh.
///
/// The registry owns `id` assignment and `last_updated`; values supplied by
/// callers for `last_updated` are ignored on write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Unique group identifier. Empty until assigned by the registry.
    #[serde(default)]
    pub id: String,

    /// Display title.
    #[serde(default)]
    pub name: String,

    /// Application namespace the group belongs to. Required.
    #[serde(rename = "appID", default)]
    pub app_id: String,

    /// Unix timestamp (seconds) of the last successful write.
    #[serde(rename = "lastUpdated", default)]
    pub last_updated: i64,

    /// Current peer list.
    #[serde(default)]
    pub peers: Vec<Peer>,

    /// Founding membership captured when the group was created.
    #[serde(rename = "genesisPeers", default)]
    pub genesis_peers: Vec<Peer>,
}

impl Group {
    /// Build a new group without an id. The genesis peer list starts out
    /// identical to the current peer list.
    pub fn new(name: impl Into<String>, app_id: impl Into<String>, peers: Vec<Peer>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            app_id: app_id.into(),
            last_updated: 0,
            genesis_peers: peers.clone(),
            peers,
        }
    }
}

/// Query parameters accepted by `GET /groups`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupsQuery {
    /// Restrict results to a single application namespace.
    #[serde(rename = "app-id")]
    pub app_id: Option<String>,
}

/// Health check response.
///
/// Returned by the `/health` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service health status.
    pub status: String,

    /// Number of groups currently registered.
    pub groups: usize,
}
