//! [`BackendAdapter`] for a self-hosted ComfyUI server.

use std::time::Duration;

use async_trait::async_trait;
use photoforge_core::backend::{AdapterKind, AssetUpload, BackendAdapter};
use photoforge_core::binder::BoundGraph;
use photoforge_core::error::GenerationError;
use photoforge_core::job::{JobHandle, RemoteStatus};

use crate::api::{ComfyUIApi, QueuePosition, DEFAULT_REQUEST_TIMEOUT};

pub const ADAPTER_NAME: &str = "comfyui";

/// Default budget for one ComfyUI generation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

pub struct ComfyUIAdapter {
    client: reqwest::Client,
    timeout: Duration,
    client_id: String,
}

impl ComfyUIAdapter {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn api(&self, endpoint: &str) -> ComfyUIApi {
        ComfyUIApi::with_client(
            self.client.clone(),
            endpoint.trim_end_matches('/').to_string(),
        )
        .with_timeout(self.timeout.min(DEFAULT_REQUEST_TIMEOUT))
    }
}

impl Default for ComfyUIAdapter {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl BackendAdapter for ComfyUIAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Async
    }

    fn requires_endpoint(&self) -> bool {
        true
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn submit(
        &self,
        endpoint: Option<&str>,
        graph: &BoundGraph,
        asset: &AssetUpload,
    ) -> Result<JobHandle, GenerationError> {
        let endpoint = endpoint.ok_or_else(|| {
            GenerationError::ConnectionUnavailable("No ComfyUI endpoint resolved".to_string())
        })?;
        let api = self.api(endpoint);

        let uploaded = api.upload_image(asset).await?;
        if uploaded.name != asset.name {
            tracing::warn!(
                expected = %asset.name,
                stored = %uploaded.name,
                "ComfyUI stored the input under a different name",
            );
        }

        let submitted = api
            .submit_workflow(&graph.graph.to_value(), &self.client_id)
            .await?;
        tracing::info!(
            prompt_id = %submitted.prompt_id,
            queue_number = submitted.number,
            template = %graph.template_id,
            address = api.api_url(),
            "Workflow queued on ComfyUI",
        );

        Ok(JobHandle::new(ADAPTER_NAME, submitted.prompt_id).with_endpoint(api.api_url()))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, GenerationError> {
        let Some(endpoint) = handle.endpoint.as_deref() else {
            return Ok(RemoteStatus::Failed("Handle carries no endpoint".to_string()));
        };
        let api = self.api(endpoint);

        // Queue first: once a prompt has left the queue its history is final.
        match api.queue_position(&handle.remote_id).await? {
            QueuePosition::Running => return Ok(RemoteStatus::Running),
            QueuePosition::Pending => return Ok(RemoteStatus::Queued),
            QueuePosition::Absent => {}
        }

        let status = match api.get_history(&handle.remote_id).await? {
            None => RemoteStatus::Failed(format!("Unknown prompt {}", handle.remote_id)),
            Some(entry) if entry.is_error() => RemoteStatus::Failed(
                entry
                    .error_message()
                    .unwrap_or_else(|| "Execution failed".to_string()),
            ),
            Some(entry) if entry.is_success() => RemoteStatus::Completed,
            Some(_) => RemoteStatus::Running,
        };
        Ok(status)
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<Vec<u8>, GenerationError> {
        let endpoint = handle.endpoint.as_deref().ok_or(GenerationError::OutputMissing)?;
        let api = self.api(endpoint);

        let entry = api
            .get_history(&handle.remote_id)
            .await?
            .ok_or(GenerationError::OutputMissing)?;
        let image = entry.first_image().ok_or_else(|| {
            tracing::warn!(prompt_id = %handle.remote_id, "History has no output image");
            GenerationError::OutputMissing
        })?;

        Ok(api.view(image).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use assert_matches::assert_matches;
    use axum::extract::{Path, Query, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use photoforge_core::graph::normalize_graph;
    use serde_json::{json, Value};

    use super::*;

    #[derive(Clone, Default)]
    struct Fake {
        prompts: Arc<Mutex<Vec<Value>>>,
    }

    async fn fake_comfyui() -> (String, Fake) {
        let fake = Fake::default();
        let app = Router::new()
            .route(
                "/upload/image",
                post(|| async { Json(json!({"name": "pf_in.png", "subfolder": "", "type": "input"})) }),
            )
            .route(
                "/prompt",
                post(|State(fake): State<Fake>, Json(body): Json<Value>| async move {
                    fake.prompts.lock().unwrap().push(body);
                    Json(json!({"prompt_id": "p-done", "number": 3, "node_errors": {}}))
                }),
            )
            .route(
                "/queue",
                get(|| async {
                    Json(json!({
                        "queue_running": [[0, "p-running", {}, {}, []]],
                        "queue_pending": [[1, "p-pending", {}, {}, []]]
                    }))
                }),
            )
            .route("/history/{id}", get(history))
            .route(
                "/view",
                get(|Query(q): Query<std::collections::HashMap<String, String>>| async move {
                    if q.get("filename").map(String::as_str) == Some("final.png")
                        && q.get("type").map(String::as_str) == Some("output")
                    {
                        Ok(b"PNGDATA".to_vec())
                    } else {
                        Err(axum::http::StatusCode::NOT_FOUND)
                    }
                }),
            )
            .with_state(fake.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), fake)
    }

    async fn history(Path(id): Path<String>) -> Json<Value> {
        let entry = match id.as_str() {
            "p-done" => json!({
                "outputs": {"9": {"images": [{"filename": "final.png", "subfolder": "", "type": "output"}]}},
                "status": {"status_str": "success", "completed": true, "messages": []}
            }),
            "p-error" => json!({
                "outputs": {},
                "status": {"status_str": "error", "completed": false, "messages": [
                    ["execution_error", {"node_type": "VAEDecode", "exception_message": "boom"}]
                ]}
            }),
            "p-empty" => json!({
                "outputs": {},
                "status": {"status_str": "success", "completed": true, "messages": []}
            }),
            _ => return Json(json!({})),
        };
        let mut history = serde_json::Map::new();
        history.insert(id, entry);
        Json(Value::Object(history))
    }

    fn bound_graph() -> BoundGraph {
        let graph = normalize_graph(&json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "pf_in.png"}},
            "9": {"class_type": "SaveImage", "inputs": {"images": ["1", 0], "filename_prefix": "photoforge_t_1"}}
        }))
        .unwrap()
        .graph;
        BoundGraph {
            template_id: "t".into(),
            graph,
            seed: 7,
            asset: "pf_in.png".into(),
            output_prefix: "photoforge_t_1".into(),
            strength: None,
            prompt: None,
        }
    }

    fn handle(addr: &str, id: &str) -> JobHandle {
        JobHandle::new(ADAPTER_NAME, id).with_endpoint(addr)
    }

    #[tokio::test]
    async fn submit_uploads_and_queues_canonical_graph() {
        let (addr, fake) = fake_comfyui().await;
        let adapter = ComfyUIAdapter::default();
        let asset = AssetUpload::new("pf_in.png", "image/png", vec![1, 2, 3]);

        let handle = adapter
            .submit(Some(&format!("{addr}/")), &bound_graph(), &asset)
            .await
            .unwrap();
        assert_eq!(handle.remote_id, "p-done");
        assert_eq!(handle.endpoint.as_deref(), Some(addr.as_str()));

        let prompts = fake.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0]["prompt"]["1"]["inputs"]["image"], "pf_in.png");
        assert_eq!(prompts[0]["prompt"]["9"]["class_type"], "SaveImage");
        assert!(prompts[0]["client_id"].is_string());
    }

    #[tokio::test]
    async fn submit_without_endpoint_is_unavailable() {
        let adapter = ComfyUIAdapter::default();
        let asset = AssetUpload::new("pf_in.png", "image/png", vec![]);
        assert_matches!(
            adapter.submit(None, &bound_graph(), &asset).await,
            Err(GenerationError::ConnectionUnavailable(_))
        );
    }

    #[tokio::test]
    async fn poll_maps_queue_and_history() {
        let (addr, _) = fake_comfyui().await;
        let adapter = ComfyUIAdapter::default();

        assert_eq!(adapter.poll(&handle(&addr, "p-running")).await.unwrap(), RemoteStatus::Running);
        assert_eq!(adapter.poll(&handle(&addr, "p-pending")).await.unwrap(), RemoteStatus::Queued);
        assert_eq!(adapter.poll(&handle(&addr, "p-done")).await.unwrap(), RemoteStatus::Completed);
        assert_eq!(
            adapter.poll(&handle(&addr, "p-error")).await.unwrap(),
            RemoteStatus::Failed("VAEDecode: boom".into())
        );
    }

    #[tokio::test]
    async fn poll_unknown_prompt_is_failed() {
        let (addr, _) = fake_comfyui().await;
        let adapter = ComfyUIAdapter::default();
        assert_matches!(
            adapter.poll(&handle(&addr, "nope")).await,
            Ok(RemoteStatus::Failed(_))
        );
        assert_matches!(
            adapter.poll(&JobHandle::new(ADAPTER_NAME, "p-done")).await,
            Ok(RemoteStatus::Failed(_))
        );
    }

    #[tokio::test]
    async fn poll_against_dead_server_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let adapter = ComfyUIAdapter::default();
        assert_matches!(
            adapter.poll(&handle(&addr, "p-done")).await,
            Err(GenerationError::ConnectionUnavailable(_))
        );
    }

    #[tokio::test]
    async fn stalled_queue_request_is_cut_off_by_adapter_timeout() {
        let app = Router::new().route(
            "/queue",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Json(json!({"queue_running": [], "queue_pending": []}))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let adapter = ComfyUIAdapter::new(reqwest::Client::new(), Duration::from_millis(300));
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            adapter.poll(&handle(&addr, "p-done")),
        )
        .await
        .expect("poll must return before the outer deadline");
        assert_matches!(result, Err(GenerationError::ConnectionUnavailable(_)));
    }

    #[tokio::test]
    async fn fetch_downloads_first_output() {
        let (addr, _) = fake_comfyui().await;
        let adapter = ComfyUIAdapter::default();
        assert_eq!(
            adapter.fetch(&handle(&addr, "p-done")).await.unwrap(),
            b"PNGDATA".to_vec()
        );
    }

    #[tokio::test]
    async fn fetch_without_images_is_output_missing() {
        let (addr, _) = fake_comfyui().await;
        let adapter = ComfyUIAdapter::default();
        assert_matches!(
            adapter.fetch(&handle(&addr, "p-empty")).await,
            Err(GenerationError::OutputMissing)
        );
        assert_matches!(
            adapter.fetch(&handle(&addr, "nope")).await,
            Err(GenerationError::OutputMissing)
        );
    }
}
