//! Router construction shared by the binary and the integration tests.

use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::{ConfigError, ServerConfig};
use crate::handlers::endpoint::SECRET_HEADER;
use crate::handlers::generation::USER_HEADER;
use crate::routes;
use crate::state::AppState;

/// Build the full application router with all middleware layers.
pub fn build_router(state: AppState) -> Result<Router, ConfigError> {
    let config = state.config.clone();
    let cors = build_cors_layer(&config)?;
    let request_id_header = HeaderName::from_static("x-request-id");

    let app = Router::new()
        // Health check at root level (not under /api/v1).
        .merge(routes::health::router())
        .nest("/api/v1", routes::api_routes(config.max_upload_bytes))
        // -- Middleware stack (applied bottom-up) --
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .layer(cors)
        .with_state(state);
    Ok(app)
}

/// Build the CORS middleware layer from server configuration.
///
/// An unparsable origin is a configuration error so misconfiguration fails
/// at startup.
fn build_cors_layer(config: &ServerConfig) -> Result<CorsLayer, ConfigError> {
    let origins = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse::<HeaderValue>().map_err(|_| ConfigError::Invalid {
                var: "CORS_ORIGINS",
                value: o.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static(USER_HEADER),
            HeaderName::from_static(SECRET_HEADER),
        ])
        .max_age(Duration::from_secs(3600)))
}
