//! HTTP routes for the Discovery API.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::middleware::http_metrics_middleware;
use crate::repositories::GroupRepository;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The group registry.
    pub repo: Arc<GroupRepository>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/group` - Create a group
/// - `/groups` - List groups (`?app-id=` filter)
/// - `/groups/:id` - Get, update or delete one group
/// - `/health` - Liveness check
/// - `/metrics` - Prometheus metrics endpoint
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let group_routes = Router::new()
        .route("/group", post(handlers::create_group))
        .route("/groups", get(handlers::list_groups))
        .route(
            "/groups/:id",
            get(handlers::get_group)
                .patch(handlers::update_group)
                .delete(handlers::delete_group),
        )
        .route("/health", get(handlers::health_check))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    with_layers(group_routes.merge(metrics_routes))
}

/// Wrap a router in the request timeout, tracing and metrics layers.
///
/// Each `.layer` call wraps everything before it, so the order of execution
/// for a request is:
/// 1. http_metrics_middleware (outermost, sees every response)
/// 2. TraceLayer (also traces 408s produced by the timeout)
/// 3. TimeoutLayer (innermost)
fn with_layers(router: Router) -> Router {
    router
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}
