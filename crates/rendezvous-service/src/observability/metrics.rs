//! Metrics definitions for the rendezvous service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rendezvous_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: HTTP methods
//! - `endpoint`: parameterized paths (group ids are replaced with `{id}`)
//! - `status`: 3 values (success, error, timeout)

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `rendezvous_http_requests_total`, `rendezvous_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("rendezvous_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint.clone(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rendezvous_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Normalize endpoint path to prevent label cardinality explosion
fn normalize_endpoint(path: &str) -> String {
    match path {
        "/group" | "/groups" | "/health" | "/metrics" => path.to_string(),
        _ => match path.strip_prefix("/groups/") {
            Some(rest) if !rest.is_empty() && !rest.contains('/') => "/groups/{id}".to_string(),
            _ => "/other".to_string(),
        },
    }
}

// ============================================================================
// Registry Metrics
// ============================================================================

/// Metric: `rendezvous_groups_created_total`
pub fn record_group_created() {
    counter!("rendezvous_groups_created_total").increment(1);
}

/// Metric: `rendezvous_groups_deleted_total`
pub fn record_group_deleted() {
    counter!("rendezvous_groups_deleted_total").increment(1);
}

/// Metric: `rendezvous_groups_evicted_total`
pub fn record_groups_evicted(count: usize) {
    counter!("rendezvous_groups_evicted_total").increment(count as u64);
}

/// Metric: `rendezvous_groups` (gauge of currently registered groups)
#[allow(clippy::cast_precision_loss)]
pub fn set_group_count(count: usize) {
    gauge!("rendezvous_groups").set(count as f64);
}

// ============================================================================
// Relay Metrics
// ============================================================================

/// Metric: `rendezvous_relay_requests_total`
/// Labels: `outcome` (binding, unauthorized, ignored)
pub fn record_relay_request(outcome: &'static str) {
    counter!("rendezvous_relay_requests_total", "outcome" => outcome).increment(1);
}
