//! Group handlers for the Discovery API.
//!
//! - `POST /group` - Create a group (or rejoin under a caller-chosen id)
//! - `GET /groups` - List groups, optionally filtered by `app-id`
//! - `GET /groups/{id}` - Fetch one group
//! - `PATCH /groups/{id}` - Replace the mutable fields of a group
//! - `DELETE /groups/{id}` - Remove a group (idempotent)
//!
//! Every successful write refreshes the group's `lastUpdated`, which is what
//! keeps it alive against the TTL sweeper.

use crate::errors::RendezvousError;
use crate::models::{Group, GroupsQuery};
use crate::routes::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Handler for POST /group
///
/// # Response
///
/// - 201 Created: the group id as a JSON string
/// - 400 Bad Request: malformed body or missing `appID`
#[instrument(skip_all, name = "rendezvous.groups.create")]
pub async fn create_group(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Group>, JsonRejection>,
) -> Result<(StatusCode, Json<String>), RendezvousError> {
    let Json(group) = payload?;

    let id = state.repo.set(group)?;

    info!(target: "rendezvous.handlers.groups", group_id = %id, "Group registered");

    Ok((StatusCode::CREATED, Json(id)))
}

/// Handler for GET /groups
///
/// Returns a map of id to group. With `?app-id=...` only groups of that
/// application are returned; an unknown application yields an empty map.
#[instrument(skip_all, name = "rendezvous.groups.list")]
pub async fn list_groups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GroupsQuery>,
) -> Json<HashMap<String, Group>> {
    let groups = match query.app_id.as_deref() {
        Some(app_id) if !app_id.is_empty() => state.repo.get_all_by_app_id(app_id),
        _ => state.repo.get_all(),
    };

    debug!(target: "rendezvous.handlers.groups", count = groups.len(), "Listed groups");

    Json(groups)
}

/// Handler for GET /groups/{id}
#[instrument(skip_all, name = "rendezvous.groups.get", fields(group_id = %id))]
pub async fn get_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Group>, RendezvousError> {
    state.repo.get(&id).map(Json)
}

/// Handler for PATCH /groups/{id}
///
/// The id in the path is authoritative. A body that names a different id is
/// rejected; a body without an id is written under the path id.
///
/// # Response
///
/// - 200 OK: the group id as a JSON string
/// - 400 Bad Request: malformed body, missing `appID`, id mismatch, or an
///   attempt to move the group to another application
#[instrument(skip_all, name = "rendezvous.groups.update", fields(group_id = %id))]
pub async fn update_group(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<Group>, JsonRejection>,
) -> Result<Json<String>, RendezvousError> {
    let Json(mut group) = payload?;

    if !group.id.is_empty() && group.id != id {
        return Err(RendezvousError::InvalidArgument(format!(
            "Group id {} in body does not match path id {}",
            group.id, id
        )));
    }
    group.id = id;

    let id = state.repo.set(group)?;

    debug!(target: "rendezvous.handlers.groups", group_id = %id, "Group refreshed");

    Ok(Json(id))
}

/// Handler for DELETE /groups/{id}
///
/// Always succeeds, whether or not the group existed.
#[instrument(skip_all, name = "rendezvous.groups.delete", fields(group_id = %id))]
pub async fn delete_group(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> String {
    state.repo.delete(&id);

    info!(target: "rendezvous.handlers.groups", group_id = %id, "Group deleted");

    format!("The group with ID {id} has been deleted successfully")
}
