use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Name of the configured generation backend.
    pub backend: String,
    /// Whether the backend can take work right now.
    pub endpoint_reachable: bool,
}

/// GET /health -- returns service and backend health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let endpoint_reachable = state.orchestrator.is_endpoint_reachable().await;

    let status = if endpoint_reachable { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        backend: state.orchestrator.adapter_name().to_string(),
        endpoint_reachable,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
