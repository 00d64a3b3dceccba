//! Integration tests for the `/api/v1/generations` resource.

mod common;

use axum::http::StatusCode;
use common::{
    body_bytes, body_json, build_comfyui_app, build_test_app, get, post, submit, submit_default,
    Field, PNG,
};

async fn submitted_id(app: &axum::Router, user: &str) -> String {
    let response = submit_default(app, user).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string()
}

// ---------------------------------------------------------------------------
// Test: full lifecycle against the echo backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_poll_wait_and_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());

    let response = submit(
        &app,
        Some("alice"),
        &[
            Field::Text("template", "faceRegion"),
            Field::Text("strength", "0.3"),
            Field::Text("seed", "42"),
            Field::Text("feature", "eyes"),
            Field::File("image", PNG),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "completed");
    assert_eq!(json["data"]["template_id"], "faceRegion");
    assert_eq!(json["data"]["backend"], "dryrun");
    let id = json["data"]["id"].as_str().unwrap().to_string();

    let polled = get(&app, &format!("/api/v1/generations/{id}")).await;
    assert_eq!(polled.status(), StatusCode::OK);
    assert_eq!(body_json(polled).await["data"]["status"], "completed");

    let waited = post(&app, &format!("/api/v1/generations/{id}/wait?timeout_secs=1")).await;
    assert_eq!(waited.status(), StatusCode::OK);
    assert_eq!(body_json(waited).await["data"]["status"], "completed");

    let result = get(&app, &format!("/api/v1/generations/{id}/result")).await;
    assert_eq!(result.status(), StatusCode::OK);
    assert_eq!(result.headers()["content-type"], "image/png");
    assert_eq!(body_bytes(result).await, PNG.to_vec());

    // The job is forgotten once its output has been delivered.
    let again = get(&app, &format!("/api/v1/generations/{id}/result")).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: request validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_user_header_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());

    let response = submit(
        &app,
        None,
        &[Field::Text("template", "faceRegion"), Field::File("image", PNG)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn missing_image_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());

    let response = submit(&app, Some("bob"), &[Field::Text("template", "faceRegion")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn out_of_range_strength_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());

    let response = submit(
        &app,
        Some("bob"),
        &[
            Field::Text("template", "faceRegion"),
            Field::Text("strength", "2.5"),
            Field::File("image", PNG),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_template_and_feature_are_invalid_templates() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());

    let response = submit(
        &app,
        Some("carol"),
        &[Field::Text("template", "nope"), Field::File("image", PNG)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_TEMPLATE");

    let response = submit(
        &app,
        Some("carol"),
        &[
            Field::Text("template", "faceRegion"),
            Field::Text("feature", "ears"),
            Field::File("image", PNG),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "INVALID_TEMPLATE");
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("'ears'"));
    assert!(message.contains("eyebrows, eyes"));
}

// ---------------------------------------------------------------------------
// Test: per-user throttle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_submission_inside_interval_is_rate_limited() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());

    submitted_id(&app, "dave").await;

    let response = submit_default(&app, "dave").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let json = body_json(response).await;
    assert_eq!(json["code"], "RATE_LIMITED");
    let retry = json["retry_after_secs"].as_u64().unwrap();
    assert!((1..=10).contains(&retry));

    // Other users are unaffected.
    submitted_id(&app, "erin").await;
}

#[tokio::test]
async fn failed_submission_does_not_consume_the_interval() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());

    let response = submit(
        &app,
        Some("frank"),
        &[Field::Text("template", "nope"), Field::File("image", PNG)],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    submitted_id(&app, "frank").await;
}

// ---------------------------------------------------------------------------
// Test: lookups of unknown or unfinished jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_returns_404_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());
    let id = "01890a5d-ac96-774b-bcce-b302099a8057";

    for response in [
        get(&app, &format!("/api/v1/generations/{id}")).await,
        post(&app, &format!("/api/v1/generations/{id}/wait")).await,
        get(&app, &format!("/api/v1/generations/{id}/result")).await,
    ] {
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "NOT_FOUND");
    }
}

#[tokio::test]
async fn malformed_job_id_is_a_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_test_app(dir.path());

    let response = get(&app, "/api/v1/generations/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: self-hosted backend without a reachable endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submission_without_endpoint_is_service_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let app = build_comfyui_app(dir.path(), None);

    let response = submit_default(&app, "gina").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "BACKEND_UNAVAILABLE");

    // The failed attempt released the throttle.
    let response = submit_default(&app, "gina").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
