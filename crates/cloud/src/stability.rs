//! Stability AI image-to-image adapter.
//!
//! Synchronous: the request returns the finished image, which is parked in
//! an [`AssetCache`] until fetched. Stability does not run graphs, so only
//! the bound parameters (prompt, strength, seed) are forwarded.

use std::time::Duration;

use async_trait::async_trait;
use photoforge_core::asset_cache::AssetCache;
use photoforge_core::backend::{AdapterKind, AssetUpload, BackendAdapter};
use photoforge_core::binder::BoundGraph;
use photoforge_core::error::GenerationError;
use photoforge_core::job::{JobHandle, RemoteStatus};
use reqwest::multipart::{Form, Part};

use crate::transport::{ensure_success, request_error};

pub const ADAPTER_NAME: &str = "stability";

/// Stability accepts seeds in `0..=4294967294`.
const MAX_SEED: u64 = 4_294_967_294;

/// Used when the template has no text encoder to take the prompt from.
const DEFAULT_PROMPT: &str = "natural portrait photo, detailed skin texture";

const DEFAULT_STRENGTH: f64 = 0.35;

#[derive(Debug, Clone)]
pub struct StabilityConfig {
    pub api_base: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl StabilityConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: "https://api.stability.ai".to_string(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct StabilityAdapter {
    client: reqwest::Client,
    config: StabilityConfig,
    results: AssetCache,
}

impl StabilityAdapter {
    pub fn new(client: reqwest::Client, config: StabilityConfig) -> Self {
        Self {
            client,
            config,
            results: AssetCache::default(),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v2beta/stable-image/generate/sd3",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl BackendAdapter for StabilityAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Sync
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
        let image = Part::bytes(asset.bytes.clone())
            .file_name(asset.name.clone())
            .mime_str(&asset.content_type)
            .map_err(|_| {
                GenerationError::ProviderRejected(format!(
                    "Unsupported content type '{}'",
                    asset.content_type
                ))
            })?;
        let prompt = graph
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROMPT);
        let strength = graph.strength.unwrap_or(DEFAULT_STRENGTH).clamp(0.0, 1.0);

        let form = Form::new()
            .part("image", image)
            .text("prompt", prompt.to_string())
            .text("strength", format!("{strength:.3}"))
            .text("seed", (graph.seed % (MAX_SEED + 1)).to_string())
            .text("mode", "image-to-image")
            .text("output_format", "png");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::ACCEPT, "image/*")
            .multipart(form)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| request_error(ADAPTER_NAME, e))?;
        let response = ensure_success(ADAPTER_NAME, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_error(ADAPTER_NAME, e))?;
        if bytes.is_empty() {
            return Err(GenerationError::OutputMissing);
        }

        let remote_id = uuid::Uuid::now_v7().to_string();
        self.results.insert(remote_id.clone(), bytes.to_vec());
        tracing::info!(remote_id = %remote_id, template = %graph.template_id, "Stability image ready");
        Ok(JobHandle::new(ADAPTER_NAME, remote_id))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, GenerationError> {
        if self.results.contains(&handle.remote_id) {
            Ok(RemoteStatus::Completed)
        } else {
            Ok(RemoteStatus::Failed("Result expired or unknown".to_string()))
        }
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<Vec<u8>, GenerationError> {
        self.results
            .take(&handle.remote_id)
            .ok_or(GenerationError::OutputMissing)
    }
}
