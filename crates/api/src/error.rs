use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use photoforge_core::error::{CoreError, GenerationError};
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`GenerationError`] and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A loading or validation error from `photoforge_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A failure from the generation pipeline.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller submitted again before the throttle interval elapsed.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    internal()
                }
            },

            // --- Generation pipeline ---
            AppError::Generation(err) => classify_generation_error(err),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            AppError::RateLimited { retry_after_secs } => {
                let body = json!({
                    "error": format!("Too many submissions, retry in {retry_after_secs}s"),
                    "code": "RATE_LIMITED",
                    "retry_after_secs": retry_after_secs,
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
                return response;
            }
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a pipeline error into an HTTP status, error code, and message.
///
/// Missing output is reported without provider detail.
fn classify_generation_error(err: &GenerationError) -> (StatusCode, &'static str, String) {
    match err {
        GenerationError::InvalidTemplate(msg) => {
            (StatusCode::BAD_REQUEST, "INVALID_TEMPLATE", msg.clone())
        }
        GenerationError::ConnectionUnavailable(msg) => {
            tracing::warn!(error = %msg, "Backend unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "BACKEND_UNAVAILABLE",
                "The generation backend is unavailable".to_string(),
            )
        }
        GenerationError::ProviderRejected(msg) => {
            (StatusCode::BAD_GATEWAY, "PROVIDER_REJECTED", msg.clone())
        }
        GenerationError::Timeout => (
            StatusCode::GATEWAY_TIMEOUT,
            "TIMEOUT",
            "Timed out waiting for the job".to_string(),
        ),
        GenerationError::OutputMissing => {
            tracing::error!("Completed job produced no retrievable output");
            internal()
        }
        GenerationError::JobNotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Generation with id {id} not found"),
        ),
        GenerationError::NotReady(id) => (
            StatusCode::CONFLICT,
            "NOT_READY",
            format!("Generation {id} is not complete"),
        ),
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
