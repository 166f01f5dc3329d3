//! # Rendezvous Test Utilities
//!
//! Shared test utilities for the rendezvous service.
//!
//! This crate provides:
//! - Server test harness (`TestRendezvousServer` for E2E tests)
//! - Mock signaling and relay launchers that record their lifecycle
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rendezvous_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestRendezvousServer::spawn().await?;
//!
//!     let response = reqwest::get(format!("{}/health", server.url())).await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod mock_subsystems;
pub mod server_harness;

// Re-export commonly used items
pub use mock_subsystems::*;
pub use server_harness::*;
