//! Repository layer for the rendezvous service.
//!
//! The registry is memory-resident; a restart yields an empty repository.

pub mod groups;

pub use groups::GroupRepository;
