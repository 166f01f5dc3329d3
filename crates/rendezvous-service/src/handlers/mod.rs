//! HTTP request handlers for the Discovery API.

pub mod groups;
pub mod health;
pub mod metrics;

pub use groups::{create_group, delete_group, get_group, list_groups, update_group};
pub use health::health_check;
pub use metrics::metrics_handler;
