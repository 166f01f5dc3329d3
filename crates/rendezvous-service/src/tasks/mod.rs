//! Background tasks for the rendezvous service.
//!
//! # Tasks
//!
//! - `ttl_sweeper` - Evicts groups that were not refreshed within their TTL

pub mod ttl_sweeper;

pub use ttl_sweeper::{start_ttl_sweeper, TtlSweeper};
