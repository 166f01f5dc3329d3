//! Rendezvous Service Library
//!
//! A rendezvous point for peer-to-peer applications. Peers register
//! "groups" (named, application-scoped peer lists that intend to bootstrap a
//! mesh), discover each other through the Discovery API, exchange connection
//! metadata through the signaling host, and learn their reflexive address
//! from the relay.
//!
//! # Architecture
//!
//! ```text
//! server.rs -> routes/mod.rs -> handlers/*.rs -> repositories/*.rs
//!           -> tasks/ttl_sweeper.rs ------------^
//!           -> subsystems/{signaling,relay}.rs
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - HTTP metrics middleware
//! - `models` - Group and peer records
//! - `observability` - Metrics definitions
//! - `repositories` - In-memory group registry
//! - `routes` - Axum router setup
//! - `server` - Lifecycle of the whole service
//! - `subsystems` - Signaling and relay collaborators
//! - `tasks` - Background tasks (TTL sweeper)

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod server;
pub mod subsystems;
pub mod tasks;
pub mod tls;
