//! The uniform contract every compute provider is driven through.
//!
//! One implementation exists per provider family. The orchestrator holds
//! exactly one `Arc<dyn BackendAdapter>`, chosen at startup.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::binder::BoundGraph;
use crate::error::GenerationError;
use crate::job::{JobHandle, RemoteStatus};

/// How an adapter delivers results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Submit returns a handle; completion is observed by polling.
    Async,
    /// Submit blocks until the asset exists; the first poll reports
    /// `Completed`.
    Sync,
}

/// The caller's input image, named the way the bound graph refers to it.
#[derive(Debug, Clone)]
pub struct AssetUpload {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AssetUpload {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short provider name used in logs and job records.
    fn name(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Whether submit needs an address from the endpoint resolver.
    fn requires_endpoint(&self) -> bool {
        false
    }

    /// Budget after which a non-terminal job is declared timed out.
    fn timeout(&self) -> Duration;

    /// Submit a bound graph together with its input image.
    ///
    /// `endpoint` is the resolved backend address when
    /// [`requires_endpoint`](Self::requires_endpoint) is true.
    async fn submit(
        &self,
        endpoint: Option<&str>,
        graph: &BoundGraph,
        asset: &AssetUpload,
    ) -> Result<JobHandle, GenerationError>;

    /// Current status of a submitted job.
    ///
    /// An unknown or expired handle yields `RemoteStatus::Failed`, never an
    /// error. Errors are reserved for transport and protocol failures.
    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, GenerationError>;

    /// Retrieve the output image of a completed job.
    async fn fetch(&self, handle: &JobHandle) -> Result<Vec<u8>, GenerationError>;
}
