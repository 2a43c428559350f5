//! Log API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{feed_order, CreateLogRequest, CreatedLog, LogEntry, LogPatch, UpdateLogRequest};
use crate::AppState;

const MISSING_FLAVOR: &str = "Please select a flavor.";

/// GET /api/logs - List logs, newest first.
pub async fn list_logs(State(state): State<AppState>) -> ApiResult<Vec<LogEntry>> {
    let snapshot = state.store.current();
    success(feed_order(&snapshot.logs), snapshot.version)
}

/// POST /api/logs - Log a consumption.
pub async fn create_log(
    State(state): State<AppState>,
    Json(request): Json<CreateLogRequest>,
) -> ApiResult<CreatedLog> {
    let revision_id = state.store.revision();

    if request.flavor.trim().is_empty() {
        return error(AppError::Validation(MISSING_FLAVOR.to_string()), revision_id);
    }

    let timestamp = request.timestamp.unwrap_or_else(Utc::now);
    match state
        .store
        .add_log_with_notes(&request.flavor, timestamp, request.notes)
        .await
    {
        Ok(id) => success(CreatedLog { id }, state.store.revision()),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/logs/:id - Edit a log. Unknown ids are ignored.
pub async fn update_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateLogRequest>,
) -> ApiResult<()> {
    let revision_id = state.store.revision();

    if request.flavor.as_deref().is_some_and(|f| f.trim().is_empty()) {
        return error(AppError::Validation(MISSING_FLAVOR.to_string()), revision_id);
    }

    match state.store.update_log(&id, LogPatch::from(request)).await {
        Ok(_) => success((), state.store.revision()),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/logs/:id - Delete a log.
pub async fn delete_log(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<()> {
    let revision_id = state.store.revision();

    match state.store.delete_log(&id).await {
        Ok(()) => success((), state.store.revision()),
        Err(e) => error(e, revision_id),
    }
}
