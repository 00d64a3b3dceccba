//! Route definitions for the backend registration webhook.

use axum::routing::post;
use axum::Router;

use crate::handlers::endpoint;
use crate::state::AppState;

/// Routes mounted at `/endpoint`.
///
/// ```text
/// POST   /                -> register_endpoint
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(endpoint::register_endpoint))
}
