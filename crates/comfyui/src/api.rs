//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps image upload, prompt submission, queue and history inspection, and
//! output download using [`reqwest`].

use std::time::Duration;

use photoforge_core::backend::AssetUpload;
use photoforge_core::error::GenerationError;
use serde::Deserialize;

use crate::history::{HistoryEntry, OutputImage};

/// Default ceiling for one REST call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP client for a single ComfyUI address.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    request_timeout: Duration,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Response of `/upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
}

/// Where a prompt currently sits in the execution queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    Running,
    Pending,
    Absent,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl From<ComfyUIApiError> for GenerationError {
    fn from(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Request(e) if e.is_connect() || e.is_timeout() => {
                GenerationError::ConnectionUnavailable(e.to_string())
            }
            ComfyUIApiError::Request(e) if e.is_decode() => {
                GenerationError::ProviderRejected("Malformed response from backend".to_string())
            }
            ComfyUIApiError::Request(e) => GenerationError::ConnectionUnavailable(e.to_string()),
            // Tunnel gateways answer 502/503/504/530 while the origin is down.
            ComfyUIApiError::ApiError { status, .. } if matches!(status, 502..=504 | 530) => {
                GenerationError::ConnectionUnavailable(format!("Backend gateway returned {status}"))
            }
            ComfyUIApiError::ApiError { status, body } => {
                GenerationError::ProviderRejected(format!("ComfyUI returned {status}: {body}"))
            }
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (the address rotates, the connection pool should not).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every request made through this client.
    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Upload the input image into ComfyUI's `input` directory under the
    /// exact name the bound graph references.
    pub async fn upload_image(&self, asset: &AssetUpload) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(asset.bytes.clone())
            .file_name(asset.name.clone())
            .mime_str(&asset.content_type)?;
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("type", "input")
            .text("overwrite", "true");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID.  Returns the server-assigned `prompt_id` and queue
    /// position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .timeout(self.request_timeout)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Locate a prompt in the running/pending queue via `GET /queue`.
    pub async fn queue_position(&self, prompt_id: &str) -> Result<QueuePosition, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/queue", self.api_url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let queue: serde_json::Value = Self::parse_response(response).await?;

        let contains = |key: &str| {
            queue
                .get(key)
                .and_then(|v| v.as_array())
                .is_some_and(|items| {
                    items.iter().any(|item| {
                        item.get(1).and_then(|id| id.as_str()) == Some(prompt_id)
                    })
                })
        };

        Ok(if contains("queue_running") {
            QueuePosition::Running
        } else if contains("queue_pending") {
            QueuePosition::Pending
        } else {
            QueuePosition::Absent
        })
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}`. ComfyUI answers `{}` for prompts
    /// it has no record of, which maps to `None`.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Option<HistoryEntry>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .timeout(self.request_timeout)
            .send()
            .await?;

        let mut history: std::collections::HashMap<String, HistoryEntry> =
            Self::parse_response(response).await?;
        Ok(history.remove(prompt_id))
    }

    /// Download one output image via `GET /view`.
    pub async fn view(&self, image: &OutputImage) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .timeout(self.request_timeout)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
