//! fal.ai queue adapter.

use std::time::Duration;

use async_trait::async_trait;
use photoforge_core::backend::{AdapterKind, AssetUpload, BackendAdapter};
use photoforge_core::binder::BoundGraph;
use photoforge_core::error::GenerationError;
use photoforge_core::job::{JobHandle, RemoteStatus};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::transport::{self, data_uri, extract_image_refs, read_json, request_error};

pub const ADAPTER_NAME: &str = "fal";

#[derive(Debug, Clone)]
pub struct FalConfig {
    pub queue_base: String,
    /// Application path, e.g. `fal-ai/comfy-server`.
    pub app: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl FalConfig {
    pub fn new(app: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            queue_base: "https://queue.fal.run".to_string(),
            app: app.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueuedRequest {
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct QueueStatus {
    #[serde(default)]
    status: String,
}

pub struct FalAdapter {
    client: reqwest::Client,
    config: FalConfig,
}

impl FalAdapter {
    pub fn new(client: reqwest::Client, config: FalConfig) -> Self {
        Self { client, config }
    }

    fn request_timeout(&self) -> Duration {
        transport::request_timeout(self.config.timeout)
    }

    fn app_url(&self) -> String {
        format!(
            "{}/{}",
            self.config.queue_base.trim_end_matches('/'),
            self.config.app.trim_matches('/')
        )
    }

    fn auth(&self) -> String {
        format!("Key {}", self.config.api_key)
    }

    /// GET a request sub-resource; `None` on 404.
    async fn get_request(&self, tail: &str) -> Result<Option<Value>, GenerationError> {
        let response = self
            .client
            .get(format!("{}/requests/{tail}", self.app_url()))
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| request_error(ADAPTER_NAME, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(ADAPTER_NAME, response).await.map(Some)
    }
}

#[async_trait]
impl BackendAdapter for FalAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Async
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    async fn submit(
        &self,
        _endpoint: Option<&str>,
        graph: &BoundGraph,
        asset: &AssetUpload,
    ) -> Result<JobHandle, GenerationError> {
        let body = json!({
            "workflow": graph.graph.to_value(),
            "images": [{
                "name": asset.name,
                "url": data_uri(&asset.content_type, &asset.bytes),
            }],
        });

        let response = self
            .client
            .post(self.app_url())
            .header(reqwest::header::AUTHORIZATION, self.auth())
            .json(&body)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| request_error(ADAPTER_NAME, e))?;
        let queued: QueuedRequest = serde_json::from_value(read_json(ADAPTER_NAME, response).await?)
            .map_err(|_| GenerationError::ProviderRejected("fal returned no request id".to_string()))?;

        tracing::info!(remote_id = %queued.request_id, template = %graph.template_id, "Request queued on fal");
        Ok(JobHandle::new(ADAPTER_NAME, queued.request_id))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, GenerationError> {
        let Some(body) = self.get_request(&format!("{}/status", handle.remote_id)).await? else {
            return Ok(RemoteStatus::Failed(format!("Unknown fal request {}", handle.remote_id)));
        };
        let status: QueueStatus = serde_json::from_value(body)
            .map_err(|_| GenerationError::ProviderRejected("Malformed fal status".to_string()))?;
        Ok(match status.status.as_str() {
            "IN_QUEUE" => RemoteStatus::Queued,
            "IN_PROGRESS" => RemoteStatus::Running,
            "COMPLETED" => RemoteStatus::Completed,
            other => RemoteStatus::Failed(format!("fal status {other}")),
        })
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<Vec<u8>, GenerationError> {
        let body = self
            .get_request(&handle.remote_id)
            .await?
            .ok_or(GenerationError::OutputMissing)?;
        let mut refs = Vec::new();
        if let Some(images) = body.get("images") {
            extract_image_refs(images, &mut refs);
        }
        let first = refs.first().ok_or(GenerationError::OutputMissing)?;
        transport::load_image(&self.client, ADAPTER_NAME, first, self.request_timeout()).await
    }
}
