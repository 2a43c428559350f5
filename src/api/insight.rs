//! AI report endpoint.

use axum::extract::State;

use super::{success, ApiResult};
use crate::insight::Insight;
use crate::models::feed_order;
use crate::AppState;

/// GET /api/insight - Generate a consumption report, or the fallback text.
pub async fn get_insight(State(state): State<AppState>) -> ApiResult<Insight> {
    let snapshot = state.store.current();
    let insight = state.insight.generate(&feed_order(&snapshot.logs)).await;
    success(insight, snapshot.version)
}
