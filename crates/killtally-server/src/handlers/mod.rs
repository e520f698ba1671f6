//! HTTP request handlers

pub mod actors;
pub mod kills;

use axum::http::StatusCode;
use killtally_core::TallyError;

/// Health check endpoint
pub async fn health() -> &'static str {
    "ok"
}

/// Status for a failed store call; the error is logged here
pub(crate) fn error_status(context: &str, e: &TallyError) -> StatusCode {
    match e {
        TallyError::Conflict(_) => {
            tracing::warn!("{}: {}", context, e);
            StatusCode::CONFLICT
        }
        TallyError::StorageUnavailable(_) | TallyError::CommitFailed(_) => {
            tracing::error!("{}: {}", context, e);
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => {
            tracing::error!("{}: {}", context, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
