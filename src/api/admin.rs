//! Admin login endpoint.

use axum::{body::Bytes, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};

use super::{error, success, ApiResult};
use crate::auth::{provided_passphrase, AdminGate};
use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub is_admin: bool,
}

/// POST /api/admin/login - Check the passphrase from the body or headers.
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<LoginResponse> {
    let revision_id = state.store.revision();

    let request = if body.is_empty() {
        LoginRequest::default()
    } else {
        match serde_json::from_slice::<LoginRequest>(&body) {
            Ok(request) => request,
            Err(e) => return error(AppError::from(e), revision_id),
        }
    };
    let provided = request
        .passphrase
        .or_else(|| provided_passphrase(&headers));

    let mut gate = AdminGate::new(state.config.admin_passphrase.as_str());
    match provided {
        Some(p) if gate.submit(&p) => {
            tracing::info!("Admin login accepted");
            success(
                LoginResponse {
                    is_admin: gate.is_admin(),
                },
                revision_id,
            )
        }
        _ => {
            tracing::warn!("Admin login rejected");
            error(
                AppError::Unauthorized("Access Denied".to_string()),
                revision_id,
            )
        }
    }
}
