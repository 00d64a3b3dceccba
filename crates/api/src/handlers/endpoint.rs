//! Registration webhook for the self-hosted backend.
//!
//! The machine running ComfyUI announces its current tunnel URL here after
//! every restart.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use photoforge_core::hashing::secrets_match;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

pub const SECRET_HEADER: &str = "x-registration-secret";

#[derive(Debug, Deserialize)]
pub struct RegisterEndpointRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterEndpointResponse {
    /// Whether the announced address answered its liveness probe.
    pub reachable: bool,
}

/// POST /api/v1/endpoint
///
/// The address is persisted even when unreachable; it is only used once a
/// probe confirms it.
pub async fn register_endpoint(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<RegisterEndpointRequest>,
) -> AppResult<Json<DataResponse<RegisterEndpointResponse>>> {
    let Some(expected) = state.config.registration_secret.as_deref() else {
        return Err(AppError::Unauthorized(
            "Endpoint registration is disabled".to_string(),
        ));
    };
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !secrets_match(provided, expected) {
        tracing::warn!("Endpoint registration with a bad secret");
        return Err(AppError::Unauthorized(
            "Invalid registration secret".to_string(),
        ));
    }

    let resolver = state.orchestrator.resolver().ok_or_else(|| {
        AppError::BadRequest(format!(
            "Backend '{}' does not use a registered endpoint",
            state.orchestrator.adapter_name()
        ))
    })?;
    let reachable = resolver.register(&input.url).await?;

    Ok(Json(DataResponse {
        data: RegisterEndpointResponse { reachable },
    }))
}
