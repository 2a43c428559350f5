//! Admin passphrase checks.
//!
//! Reads are open. Every other method on the API router needs the shared
//! passphrase, compared in constant time.

mod gate;

pub use gate::AdminGate;

use axum::{
    extract::Request,
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, AppErrorWithRevision};

/// Header carrying the admin passphrase.
pub const PASSPHRASE_HEADER: &str = "x-admin-passphrase";

/// Middleware: let reads through, require the passphrase for anything else.
pub async fn admin_auth_layer(passphrase: String, request: Request, next: Next) -> Response {
    if is_read(request.method()) {
        return next.run(request).await;
    }

    match provided_passphrase(request.headers()) {
        Some(provided) if verify_passphrase(&provided, &passphrase) => next.run(request).await,
        Some(_) => unauthorized_response("Incorrect Passphrase"),
        None => unauthorized_response("Missing admin passphrase"),
    }
}

fn is_read(method: &Method) -> bool {
    [Method::GET, Method::HEAD, Method::OPTIONS].contains(method)
}

/// Passphrase from the dedicated header, falling back to a bearer token.
pub fn provided_passphrase(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(PASSPHRASE_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Exact, case-sensitive match in constant time.
pub fn verify_passphrase(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn unauthorized_response(message: &str) -> Response {
    AppErrorWithRevision {
        error: AppError::Unauthorized(message.to_string()),
        revision_id: 0,
    }
    .into_response()
}
