#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use photoforge_api::app::build_router;
use photoforge_api::backend::build_orchestrator;
use photoforge_api::config::{BackendConfig, EndpointConfig, ServerConfig};
use photoforge_api::state::AppState;
use photoforge_core::throttle::SubmissionThrottle;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-body";

const BOUNDARY: &str = "photoforge-test-boundary";

/// Build a test `ServerConfig` rooted at `dir`.
///
/// Templates are read from `dir/templates` and the endpoint registry lives
/// at `dir/endpoint.json`.
pub fn test_config(dir: &Path, backend: BackendConfig, secret: Option<&str>) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        max_upload_bytes: 1024 * 1024,
        template_dir: dir.join("templates"),
        backend,
        registration_secret: secret.map(str::to_string),
        endpoint: EndpointConfig {
            registry_path: dir.join("endpoint.json"),
            tunnel_log_path: None,
            tunnel_url_pattern: photoforge_comfyui::tunnel::DEFAULT_TUNNEL_PATTERN.to_string(),
            candidates: Vec::new(),
            candidate_template: "http://{name}.invalid".to_string(),
            recheck_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_millis(500),
        },
        submission_min_interval: Duration::from_secs(10),
    }
}

/// Write the `faceRegion` fixture template into `dir/templates`.
pub fn write_templates(dir: &Path) -> PathBuf {
    let templates = dir.join("templates");
    std::fs::create_dir_all(&templates).unwrap();
    let graph = json!({
        "1": {"class_type": "LoadImage", "inputs": {"image": "placeholder.png"}},
        "2": {"class_type": "FaceRegionMask", "inputs": {"image": ["1", 0], "area": "face", "grow": 0, "blur": 0}},
        "3": {"class_type": "KSampler", "inputs": {"seed": 0, "steps": 20, "cfg": 7.0, "denoise": 0.6}},
        "9": {"class_type": "SaveImage", "inputs": {"images": ["3", 0], "filename_prefix": "x"}}
    });
    std::fs::write(templates.join("faceRegion.json"), graph.to_string()).unwrap();
    templates
}

/// Build the full application router with all middleware layers for the
/// given config.
pub fn build_app(config: ServerConfig) -> Router {
    let orchestrator = build_orchestrator(&config).unwrap();
    let state = AppState {
        throttle: Arc::new(SubmissionThrottle::new(config.submission_min_interval)),
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(config),
    };
    build_router(state).unwrap()
}

/// Router backed by the offline echo backend.
pub fn build_test_app(dir: &Path) -> Router {
    write_templates(dir);
    build_app(test_config(dir, BackendConfig::DryRun, None))
}

/// Router backed by the self-hosted ComfyUI backend with no known endpoint.
pub fn build_comfyui_app(dir: &Path, secret: Option<&str>) -> Router {
    write_templates(dir);
    build_app(test_config(
        dir,
        BackendConfig::ComfyUI {
            timeout: Duration::from_secs(60),
        },
        secret,
    ))
}

/// Serve `app` on an ephemeral port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

pub enum Field<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a [u8]),
}

/// Encode `fields` as a `multipart/form-data` body.
pub fn multipart_body(fields: &[Field<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for field in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match field {
            Field::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Field::File(name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"input.png\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart submission as `user` (no header when `None`).
pub async fn submit(app: &Router, user: Option<&str>, fields: &[Field<'_>]) -> Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/generations")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    let request = builder.body(Body::from(multipart_body(fields))).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

/// Submit the fixture template with the fixture image.
pub async fn submit_default(app: &Router, user: &str) -> Response<Body> {
    submit(
        app,
        Some(user),
        &[Field::Text("template", "faceRegion"), Field::File("image", PNG)],
    )
    .await
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn post_json(
    app: &Router,
    uri: &str,
    headers: &[(&str, &str)],
    body: Value,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
