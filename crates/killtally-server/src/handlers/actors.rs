//! Actor lookups, kill counts and registration

use super::error_status;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use killtally_core::{ActorId, KillCount, KillRecord};
use serde::{Deserialize, Serialize};

/// Longest accepted display name, in characters
const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Serialize)]
pub struct KillsResponse {
    pub actor: ActorId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub total: u64,
    pub pending: u64,
    /// Absent when storage could not be reached
    pub persisted: Option<u64>,
    pub degraded: bool,
}

impl KillsResponse {
    fn new(actor: ActorId, count: KillCount) -> Self {
        Self {
            actor,
            name: None,
            total: count.total(),
            pending: count.pending(),
            persisted: count.persisted(),
            degraded: count.is_degraded(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExistsResponse {
    pub actor: ActorId,
    pub exists: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

/// Total kills for an actor, degrading to pending-only when storage is down
pub async fn kills(
    State(state): State<AppState>,
    Path(actor): Path<ActorId>,
) -> Json<KillsResponse> {
    let count = state.tracker.kill_count_or_pending(actor).await;
    Json(KillsResponse::new(actor, count))
}

pub async fn exists(
    State(state): State<AppState>,
    Path(actor): Path<ActorId>,
) -> Result<Json<ExistsResponse>, StatusCode> {
    let exists = state
        .tracker
        .actor_exists(actor)
        .await
        .map_err(|e| error_status("Failed to check actor", &e))?;
    Ok(Json(ExistsResponse { actor, exists }))
}

/// Register a display name for an actor, or rename it
pub async fn register(
    State(state): State<AppState>,
    Path(actor): Path<ActorId>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<StatusCode, StatusCode> {
    let Json(req) = payload.map_err(|rejection| {
        tracing::debug!("Rejected registration for {}: {}", actor, rejection);
        StatusCode::BAD_REQUEST
    })?;
    let name = req.name.trim();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .tracker
        .register_actor(actor, name)
        .await
        .map_err(|e| error_status("Failed to register actor", &e))?;
    tracing::info!("Registered actor {} as '{}'", actor, name);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn kills_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<KillsResponse>, StatusCode> {
    let record = state
        .tracker
        .query()
        .find_actor_by_name(&name)
        .await
        .map_err(|e| error_status("Failed to look up actor", &e))?
        .ok_or(StatusCode::NOT_FOUND)?;

    let count = state.tracker.kill_count_or_pending(record.id).await;
    let mut response = KillsResponse::new(record.id, count);
    response.name = Some(record.name);
    Ok(Json(response))
}

/// Persisted per-target breakdown
pub async fn records(
    State(state): State<AppState>,
    Path(actor): Path<ActorId>,
) -> Result<Json<Vec<KillRecord>>, StatusCode> {
    let records = state
        .tracker
        .query()
        .kill_records(actor)
        .await
        .map_err(|e| error_status("Failed to load kill records", &e))?;
    Ok(Json(records))
}
