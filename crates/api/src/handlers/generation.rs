//! Handlers for generation jobs.
//!
//! Routes:
//! - `POST /generations`                 multipart submit
//! - `GET  /generations/{id}`            poll once
//! - `POST /generations/{id}/wait`       block until terminal or timeout
//! - `GET  /generations/{id}/result`     download the output image

use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use photoforge_core::error::CoreError;
use photoforge_core::job::JobSnapshot;
use photoforge_core::types::JobId;
use photoforge_pipeline::asset::sniff_image;
use photoforge_pipeline::orchestrator::GenerationRequest;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

pub const USER_HEADER: &str = "x-user-id";

/// Wait budget when the caller gives none.
const DEFAULT_WAIT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
pub struct WaitParams {
    pub timeout_secs: Option<u64>,
}

/// POST /api/v1/generations
///
/// Multipart fields: `template` and `image` are required; `strength`,
/// `seed`, `prompt` and repeated `feature` are optional. The submitting user
/// comes from the `x-user-id` header and is throttled.
pub async fn create_generation(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<JobSnapshot>>)> {
    let user = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("Missing {USER_HEADER} header")))?
        .to_string();

    let (request, image) = read_submission(multipart).await?;

    if let Err(wait) = state.throttle.check_and_record(&user) {
        tracing::debug!(user = %user, wait_ms = wait.as_millis() as u64, "Submission throttled");
        return Err(AppError::RateLimited {
            retry_after_secs: wait.as_secs_f64().ceil().max(1.0) as u64,
        });
    }

    let id = match state.orchestrator.submit(&request, image).await {
        Ok(id) => id,
        Err(e) => {
            state.throttle.release(&user);
            return Err(e.into());
        }
    };

    let snapshot = state
        .orchestrator
        .job(id)
        .await
        .ok_or_else(|| AppError::InternalError(format!("Job {id} vanished after submit")))?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: snapshot })))
}

/// GET /api/v1/generations/{id}
///
/// Advances the job by at most one backend poll.
pub async fn get_generation(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<DataResponse<JobSnapshot>>> {
    state.orchestrator.poll_once(id).await;
    let snapshot = find_job(&state, id).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

/// POST /api/v1/generations/{id}/wait?timeout_secs=
///
/// The budget is capped below the HTTP request timeout. Running out of
/// budget yields 504 and leaves the job untouched.
pub async fn wait_generation(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
    Query(params): Query<WaitParams>,
) -> AppResult<Json<DataResponse<JobSnapshot>>> {
    let cap = state.config.request_timeout_secs.saturating_sub(1).max(1);
    let budget = params.timeout_secs.unwrap_or(DEFAULT_WAIT_SECS).min(cap);

    state
        .orchestrator
        .wait_for_completion(id, Duration::from_secs(budget))
        .await?;
    let snapshot = find_job(&state, id).await?;
    Ok(Json(DataResponse { data: snapshot }))
}

/// GET /api/v1/generations/{id}/result
///
/// Serves the output once; the job is forgotten afterwards.
pub async fn get_generation_result(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let bytes = state.orchestrator.fetch_result(id).await?;
    let (content_type, _) = sniff_image(&bytes);
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

async fn find_job(state: &AppState, id: JobId) -> AppResult<JobSnapshot> {
    state.orchestrator.job(id).await.ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "Generation",
            id: id.to_string(),
        })
    })
}

/// Collect the multipart form into a request plus the raw image bytes.
/// Unknown fields are ignored.
async fn read_submission(mut multipart: Multipart) -> AppResult<(GenerationRequest, Vec<u8>)> {
    let mut request = GenerationRequest::default();
    let mut image: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            image = Some(data.to_vec());
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        let value = text.trim();
        match name.as_str() {
            "template" => request.template = value.to_string(),
            "strength" if !value.is_empty() => {
                request.strength = Some(parse_strength(value)?);
            }
            "seed" if !value.is_empty() => {
                request.seed = Some(value.parse().map_err(|_| {
                    AppError::BadRequest(format!("seed must be a non-negative integer, got '{value}'"))
                })?);
            }
            "prompt" if !value.is_empty() => request.prompt = Some(value.to_string()),
            "feature" if !value.is_empty() => request.features.push(value.to_string()),
            _ => {}
        }
    }

    if request.template.is_empty() {
        return Err(AppError::BadRequest("Missing 'template' field".to_string()));
    }
    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing 'image' field".to_string()))?;
    Ok((request, image))
}

fn parse_strength(value: &str) -> AppResult<f64> {
    match value.parse::<f64>() {
        Ok(strength) if (0.0..=1.0).contains(&strength) => Ok(strength),
        _ => Err(AppError::BadRequest(format!(
            "strength must be a number between 0 and 1, got '{value}'"
        ))),
    }
}
