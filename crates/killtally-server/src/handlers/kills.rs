//! Kill event intake

use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use killtally_core::ActorId;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct KillEvent {
    pub actor: ActorId,
    pub target: ActorId,
}

/// Count one kill; returns before anything touches storage
pub async fn record(
    State(state): State<AppState>,
    payload: Result<Json<KillEvent>, JsonRejection>,
) -> StatusCode {
    let Json(event) = match payload {
        Ok(event) => event,
        Err(rejection) => {
            tracing::debug!("Rejected kill event: {}", rejection);
            return StatusCode::BAD_REQUEST;
        }
    };
    if event.actor == event.target {
        tracing::debug!("Rejected self-kill by {}", event.actor);
        return StatusCode::BAD_REQUEST;
    }
    state.tracker.record_kill(event.actor, event.target);
    StatusCode::ACCEPTED
}
