//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /health
///
/// The Discovery API has no downstream dependencies, so answering at all
/// means it is healthy. The current group count is included for operators.
///
/// ```json
/// { "status": "healthy", "groups": 3 }
/// ```
#[instrument(skip_all, name = "rendezvous.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        groups: state.repo.len(),
    })
}
