//! Replicate predictions adapter.
//!
//! Targets a ComfyUI model version that accepts the workflow as a JSON
//! string plus one input file.

use std::time::Duration;

use async_trait::async_trait;
use photoforge_core::backend::{AdapterKind, AssetUpload, BackendAdapter};
use photoforge_core::binder::BoundGraph;
use photoforge_core::error::GenerationError;
use photoforge_core::job::{JobHandle, RemoteStatus};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::transport::{self, data_uri, extract_image_refs, read_json, request_error};

pub const ADAPTER_NAME: &str = "replicate";

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_base: String,
    pub api_token: String,
    /// Model version hash the predictions run against.
    pub version: String,
    pub timeout: Duration,
}

impl ReplicateConfig {
    pub fn new(api_token: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.replicate.com/v1".to_string(),
            api_token: api_token.into(),
            version: version.into(),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

pub struct ReplicateAdapter {
    client: reqwest::Client,
    config: ReplicateConfig,
}

impl ReplicateAdapter {
    pub fn new(client: reqwest::Client, config: ReplicateConfig) -> Self {
        Self { client, config }
    }

    fn request_timeout(&self) -> Duration {
        transport::request_timeout(self.config.timeout)
    }

    fn predictions_url(&self) -> String {
        format!("{}/predictions", self.config.api_base.trim_end_matches('/'))
    }

    async fn prediction(&self, id: &str) -> Result<Option<Prediction>, GenerationError> {
        let response = self
            .client
            .get(format!("{}/{id}", self.predictions_url()))
            .bearer_auth(&self.config.api_token)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| request_error(ADAPTER_NAME, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        parse_prediction(read_json(ADAPTER_NAME, response).await?).map(Some)
    }
}

fn parse_prediction(body: Value) -> Result<Prediction, GenerationError> {
    serde_json::from_value(body)
        .map_err(|_| GenerationError::ProviderRejected("Malformed Replicate prediction".to_string()))
}

#[async_trait]
impl BackendAdapter for ReplicateAdapter {
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
        let workflow = serde_json::to_string(&graph.graph).map_err(|e| {
            GenerationError::InvalidTemplate(format!("Bound graph is not serializable: {e}"))
        })?;
        let body = json!({
            "version": self.config.version,
            "input": {
                "workflow_json": workflow,
                "input_file": data_uri(&asset.content_type, &asset.bytes),
            }
        });

        let response = self
            .client
            .post(self.predictions_url())
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| request_error(ADAPTER_NAME, e))?;
        let prediction = parse_prediction(read_json(ADAPTER_NAME, response).await?)?;

        tracing::info!(
            remote_id = %prediction.id,
            template = %graph.template_id,
            "Prediction created on Replicate",
        );
        Ok(JobHandle::new(ADAPTER_NAME, prediction.id))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, GenerationError> {
        let Some(prediction) = self.prediction(&handle.remote_id).await? else {
            return Ok(RemoteStatus::Failed(format!(
                "Unknown Replicate prediction {}",
                handle.remote_id
            )));
        };
        Ok(match prediction.status.to_ascii_lowercase().as_str() {
            "starting" => RemoteStatus::Queued,
            "processing" => RemoteStatus::Running,
            "succeeded" => RemoteStatus::Completed,
            other => RemoteStatus::Failed(match prediction.error {
                Some(Value::String(reason)) if !reason.is_empty() => reason,
                _ => other.to_string(),
            }),
        })
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<Vec<u8>, GenerationError> {
        let prediction = self
            .prediction(&handle.remote_id)
            .await?
            .ok_or(GenerationError::OutputMissing)?;
        let mut urls = Vec::new();
        if let Some(output) = &prediction.output {
            extract_image_refs(output, &mut urls);
        }
        let first = urls.first().ok_or(GenerationError::OutputMissing)?;
        transport::load_image(&self.client, ADAPTER_NAME, first, self.request_timeout()).await
    }
}
