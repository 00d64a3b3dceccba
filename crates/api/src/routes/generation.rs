//! Route definitions for the `/generations` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::generation;
use crate::state::AppState;

/// Routes mounted at `/generations`.
///
/// ```text
/// POST   /                -> create_generation
/// GET    /{id}            -> get_generation
/// POST   /{id}/wait       -> wait_generation
/// GET    /{id}/result     -> get_generation_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(generation::create_generation))
        .route("/{id}", get(generation::get_generation))
        .route("/{id}/wait", post(generation::wait_generation))
        .route("/{id}/result", get(generation::get_generation_result))
}
