//! Offline adapter that echoes the input image back.
//!
//! Synchronous like Stability; used for local development and in tests that
//! exercise the full request path without a GPU.

use std::time::Duration;

use async_trait::async_trait;
use photoforge_core::asset_cache::AssetCache;
use photoforge_core::backend::{AdapterKind, AssetUpload, BackendAdapter};
use photoforge_core::binder::BoundGraph;
use photoforge_core::error::GenerationError;
use photoforge_core::job::{JobHandle, RemoteStatus};

pub const ADAPTER_NAME: &str = "dryrun";

#[derive(Default)]
pub struct DryRunAdapter {
    results: AssetCache,
}

impl DryRunAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BackendAdapter for DryRunAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Sync
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    async fn submit(
        &self,
        _endpoint: Option<&str>,
        graph: &BoundGraph,
        asset: &AssetUpload,
    ) -> Result<JobHandle, GenerationError> {
        let remote_id = uuid::Uuid::now_v7().to_string();
        tracing::debug!(
            remote_id = %remote_id,
            template = %graph.template_id,
            nodes = graph.graph.len(),
            seed = graph.seed,
            "Dry run accepted graph",
        );
        self.results.insert(remote_id.clone(), asset.bytes.clone());
        Ok(JobHandle::new(ADAPTER_NAME, remote_id))
    }

    async fn poll(&self, handle: &JobHandle) -> Result<RemoteStatus, GenerationError> {
        Ok(if self.results.contains(&handle.remote_id) {
            RemoteStatus::Completed
        } else {
            RemoteStatus::Failed("Result expired or unknown".to_string())
        })
    }

    async fn fetch(&self, handle: &JobHandle) -> Result<Vec<u8>, GenerationError> {
        self.results
            .take(&handle.remote_id)
            .ok_or(GenerationError::OutputMissing)
    }
}
