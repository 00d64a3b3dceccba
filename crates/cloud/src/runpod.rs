//! RunPod serverless adapter.
//!
//! The endpoint runs a ComfyUI worker: the bound graph goes in as
//! `input.workflow` and the input image travels inline as base64.

use std::time::Duration;

use async_trait::async_trait;
use photoforge_core::backend::{AdapterKind, AssetUpload, BackendAdapter};
use photoforge_core::binder::BoundGraph;
use photoforge_core::error::GenerationError;
use photoforge_core::job::{JobHandle, RemoteStatus};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::transport::{self, encode, extract_image_refs, read_json, request_error};

pub const ADAPTER_NAME: &str = "runpod";

#[derive(Debug, Clone)]
pub struct RunPodConfig {
    pub api_base: String,
    pub endpoint_id: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl RunPodConfig {
    pub fn new(endpoint_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.runpod.ai".to_string(),
            endpoint_id: endpoint_id.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

pub struct RunPodAdapter {
    client: reqwest::Client,
    config: RunPodConfig,
}

impl RunPodAdapter {
    pub fn new(client: reqwest::Client, config: RunPodConfig) -> Self {
        Self { client, config }
    }

    fn request_timeout(&self) -> Duration {
        transport::request_timeout(self.config.timeout)
    }

    fn url(&self, tail: &str) -> String {
        format!(
            "{}/v2/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.endpoint_id,
            tail
        )
    }

    /// Fetch `/status/{id}`; `None` when RunPod no longer knows the job.
    async fn status(&self, remote_id: &str) -> Result<Option<StatusResponse>, GenerationError> {
        let response = self
            .client
            .get(self.url(&format!("status/{remote_id}")))
            .bearer_auth(&self.config.api_key)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| request_error(ADAPTER_NAME, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = read_json(ADAPTER_NAME, response).await?;
        serde_json::from_value(body)
            .map(Some)
            .map_err(|_| GenerationError::ProviderRejected("Malformed RunPod status".to_string()))
    }
}

fn error_text(error: Option<&Value>, fallback: &str) -> String {
    match error {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

#[async_trait]
impl BackendAdapter for RunPodAdapter {
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
            "input": {
                "workflow": graph.graph.to_value(),
                "images": [{ "name": asset.name, "image": encode(&asset.bytes) }],
            }
        });

        let response = self
            .client
            .post(self.url("run"))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| request_error(ADAPTER_NAME, e))?;
        let run: RunResponse = serde_json::from_value(read_json(ADAPTER_NAME, response).await?)
            .map_err(|_| GenerationError::ProviderRejected("RunPod returned no job id".to_string()))?;

        tracing::info!(remote_id = %run.id, template = %graph.template_id, "Job queued on RunPod");
        Ok(JobHandle::new(ADAPTER_NAME, run.id))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, GenerationError> {
        let Some(status) = self.status(&handle.remote_id).await? else {
            return Ok(RemoteStatus::Failed(format!("Unknown RunPod job {}", handle.remote_id)));
        };
        Ok(match status.status.as_str() {
            "IN_QUEUE" => RemoteStatus::Queued,
            "IN_PROGRESS" => RemoteStatus::Running,
            "COMPLETED" => RemoteStatus::Completed,
            other => RemoteStatus::Failed(error_text(status.error.as_ref(), other)),
        })
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<Vec<u8>, GenerationError> {
        let status = self
            .status(&handle.remote_id)
            .await?
            .ok_or(GenerationError::OutputMissing)?;
        let mut refs = Vec::new();
        if let Some(output) = &status.output {
            extract_image_refs(output, &mut refs);
        }
        let first = refs.first().ok_or(GenerationError::OutputMissing)?;
        transport::load_image(&self.client, ADAPTER_NAME, first, self.request_timeout()).await
    }
}
