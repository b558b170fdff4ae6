//! Liveness and operation counters.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::ledger::MetricsSnapshot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub metrics: MetricsSnapshot,
}

/// Creates the health router.
pub fn router(state: AppState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// GET /api/v1/health
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        metrics: state.ledger.metrics().snapshot(),
    })
}
