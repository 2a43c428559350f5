//! Flavor API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{error, success, ApiResult};
use crate::errors::AppError;
use crate::models::{Flavor, FlavorNameRequest};
use crate::AppState;

/// GET /api/flavors - List the catalog.
pub async fn list_flavors(State(state): State<AppState>) -> ApiResult<Vec<Flavor>> {
    let snapshot = state.store.current();
    success(snapshot.flavors.as_ref().clone(), snapshot.version)
}

/// POST /api/flavors - Add a custom flavor. Duplicates are ignored.
pub async fn create_flavor(
    State(state): State<AppState>,
    Json(request): Json<FlavorNameRequest>,
) -> ApiResult<()> {
    let revision_id = state.store.revision();

    let name = request.name.trim();
    if name.is_empty() {
        return error(
            AppError::Validation("Flavor name is required".to_string()),
            revision_id,
        );
    }

    match state.store.add_flavor(name).await {
        Ok(_) => success((), state.store.revision()),
        Err(e) => error(e, revision_id),
    }
}

/// PUT /api/flavors/:id - Rename a flavor and every log that carries it.
pub async fn update_flavor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FlavorNameRequest>,
) -> ApiResult<()> {
    let revision_id = state.store.revision();

    let name = request.name.trim();
    if name.is_empty() {
        return error(
            AppError::Validation("Flavor name is required".to_string()),
            revision_id,
        );
    }

    match state.store.update_flavor(&id, name).await {
        Ok(_) => success((), state.store.revision()),
        Err(e) => error(e, revision_id),
    }
}

/// DELETE /api/flavors/:id - Delete a flavor. Logs keep their names.
pub async fn delete_flavor(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    let revision_id = state.store.revision();

    match state.store.delete_flavor(&id).await {
        Ok(()) => success((), state.store.revision()),
        Err(e) => error(e, revision_id),
    }
}
