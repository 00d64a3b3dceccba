pub mod endpoint;
pub mod generation;
pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /endpoint                          register backend address (POST)
///
/// /generations                       submit (multipart POST)
/// /generations/{id}                  poll once (GET)
/// /generations/{id}/wait             wait for completion (POST)
/// /generations/{id}/result           download output (GET)
/// ```
pub fn api_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .nest("/endpoint", endpoint::router())
        .nest(
            "/generations",
            generation::router().layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}
