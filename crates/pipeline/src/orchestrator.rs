//! Job orchestration: submit, poll, wait, fetch.
//!
//! [`JobOrchestrator`] owns the job registry and drives exactly one
//! [`BackendAdapter`], chosen at startup. Every provider's lifecycle is
//! folded into the canonical [`JobStatus`] state machine, which only moves
//! forward. Nothing runs in the background: jobs advance when a caller polls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use photoforge_comfyui::resolver::EndpointResolver;
use photoforge_core::backend::{AdapterKind, AssetUpload, BackendAdapter};
use photoforge_core::binder::{bind, BindParams};
use photoforge_core::error::{CoreError, GenerationError};
use photoforge_core::feature::FeatureCatalog;
use photoforge_core::job::{JobHandle, JobSnapshot, JobStatus, RemoteStatus};
use photoforge_core::template::TemplateStore;
use photoforge_core::types::{JobId, Timestamp};
use tokio::sync::RwLock;

use crate::asset::sniff_image;
use crate::backoff::{next_delay, BackoffConfig};

/// Jobs older than this are dropped on the next submit.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

/// Parameters of one generation request, before binding.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub template: String,
    pub strength: Option<f64>,
    pub seed: Option<u64>,
    pub prompt: Option<String>,
    /// Feature region names, resolved against the catalog.
    pub features: Vec<String>,
}

/// Registry entry for one job.
struct JobRecord {
    id: JobId,
    template_id: String,
    handle: JobHandle,
    status: JobStatus,
    error: Option<String>,
    created_at: Timestamp,
    updated_at: Timestamp,
    started: Instant,
}

impl JobRecord {
    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            backend: self.handle.backend.clone(),
            template_id: self.template_id.clone(),
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            error: self.error.clone(),
        }
    }
}

pub struct JobOrchestrator {
    templates: TemplateStore,
    features: FeatureCatalog,
    adapter: Arc<dyn BackendAdapter>,
    resolver: Option<Arc<EndpointResolver>>,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    backoff: BackoffConfig,
    retention: Duration,
}

impl JobOrchestrator {
    pub fn new(
        templates: TemplateStore,
        features: FeatureCatalog,
        adapter: Arc<dyn BackendAdapter>,
    ) -> Self {
        Self {
            templates,
            features,
            adapter,
            resolver: None,
            jobs: RwLock::new(HashMap::new()),
            backoff: BackoffConfig::default(),
            retention: DEFAULT_RETENTION,
        }
    }

    /// Endpoint resolver for adapters that need a self-hosted address.
    pub fn with_resolver(mut self, resolver: Arc<EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.name()
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn features(&self) -> &FeatureCatalog {
        &self.features
    }

    pub fn resolver(&self) -> Option<&Arc<EndpointResolver>> {
        self.resolver.as_ref()
    }

    /// Bind the request into its template and hand it to the backend.
    ///
    /// Synchronous backends finish inside this call, so their jobs start out
    /// `Completed`.
    pub async fn submit(
        &self,
        request: &GenerationRequest,
        image: Vec<u8>,
    ) -> Result<JobId, GenerationError> {
        self.sweep_expired().await;

        let template = self.templates.get(&request.template).ok_or_else(|| {
            GenerationError::InvalidTemplate(format!("Unknown template '{}'", request.template))
        })?;
        let features = self
            .features
            .resolve(&request.features)
            .map_err(|e| match e {
                CoreError::Validation(msg) => GenerationError::InvalidTemplate(msg),
                other => GenerationError::InvalidTemplate(other.to_string()),
            })?;

        let (content_type, extension) = sniff_image(&image);
        let asset_name = format!("pf_{}.{extension}", uuid::Uuid::new_v4().simple());

        let params = BindParams {
            asset: asset_name.clone(),
            strength: request.strength,
            seed: request.seed,
            prompt: request.prompt.clone(),
            features,
        };
        let bound = bind(&template, &params)?;
        let asset = AssetUpload::new(asset_name, content_type, image);

        let endpoint = if self.adapter.requires_endpoint() {
            Some(self.resolve_endpoint().await?)
        } else {
            None
        };

        let handle = match self.adapter.submit(endpoint.as_deref(), &bound, &asset).await {
            Ok(handle) => handle,
            Err(e) => {
                if matches!(e, GenerationError::ConnectionUnavailable(_)) {
                    self.invalidate_endpoint();
                }
                tracing::warn!(
                    template = %request.template,
                    backend = self.adapter.name(),
                    error = %e,
                    "Submission failed",
                );
                return Err(e);
            }
        };

        let status = match self.adapter.kind() {
            AdapterKind::Sync => JobStatus::Completed,
            AdapterKind::Async => JobStatus::Queued,
        };
        let now = Utc::now();
        let id = uuid::Uuid::now_v7();
        tracing::info!(
            job_id = %id,
            template = %request.template,
            backend = self.adapter.name(),
            remote_id = %handle.remote_id,
            seed = bound.seed,
            status = %status,
            "Job submitted",
        );

        self.jobs.write().await.insert(
            id,
            JobRecord {
                id,
                template_id: request.template.clone(),
                handle,
                status,
                error: None,
                created_at: now,
                updated_at: now,
                started: Instant::now(),
            },
        );
        Ok(id)
    }

    /// Advance a job by one backend poll and return its status.
    ///
    /// Unknown jobs report `Failed`. Terminal jobs are never polled again.
    /// When a self-hosted backend is unreachable and the resolver finds it
    /// under a new address, the job moves there and is polled once more.
    pub async fn poll_once(&self, id: JobId) -> JobStatus {
        let (handle, status, started) = {
            let jobs = self.jobs.read().await;
            match jobs.get(&id) {
                Some(record) => (record.handle.clone(), record.status, record.started),
                None => {
                    tracing::debug!(job_id = %id, "Poll for unknown job");
                    return JobStatus::Failed;
                }
            }
        };

        if status.is_terminal() {
            return status;
        }

        let budget = self.adapter.timeout();
        if started.elapsed() >= budget {
            return self
                .advance(
                    id,
                    JobStatus::TimedOut,
                    Some(format!("No result within {}s", budget.as_secs())),
                )
                .await;
        }

        let mut result = self.adapter.poll(&handle).await;
        if matches!(result, Err(GenerationError::ConnectionUnavailable(_))) {
            if let Some(moved) = self.relocate(id, &handle).await {
                result = self.adapter.poll(&moved).await;
            }
        }

        match result {
            Ok(RemoteStatus::Failed(reason)) => {
                self.advance(id, JobStatus::Failed, Some(reason)).await
            }
            Ok(remote) => self.advance(id, remote.status(), None).await,
            Err(GenerationError::ConnectionUnavailable(reason)) => {
                tracing::warn!(job_id = %id, reason = %reason, "Backend unreachable during poll");
                self.invalidate_endpoint();
                status
            }
            Err(e) => self.advance(id, JobStatus::Failed, Some(e.to_string())).await,
        }
    }

    /// Poll with exponential backoff until the job is terminal or `budget`
    /// runs out.
    ///
    /// Running out of budget returns [`GenerationError::Timeout`] and leaves
    /// the job as it was; the job itself only times out against the
    /// backend's own budget.
    pub async fn wait_for_completion(
        &self,
        id: JobId,
        budget: Duration,
    ) -> Result<JobStatus, GenerationError> {
        if !self.jobs.read().await.contains_key(&id) {
            return Err(GenerationError::JobNotFound(id.to_string()));
        }

        let deadline = Instant::now() + budget;
        let mut delay = self.backoff.initial_delay;
        loop {
            let status = self.poll_once(id).await;
            if status.is_terminal() {
                return Ok(status);
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(job_id = %id, status = %status, "Wait budget exhausted");
                return Err(GenerationError::Timeout);
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = next_delay(delay, &self.backoff);
        }
    }

    /// Retrieve the output of a completed job. The job is forgotten once
    /// its bytes have been handed out.
    pub async fn fetch_result(&self, id: JobId) -> Result<Vec<u8>, GenerationError> {
        let handle = {
            let jobs = self.jobs.read().await;
            let record = jobs
                .get(&id)
                .ok_or_else(|| GenerationError::JobNotFound(id.to_string()))?;
            if record.status != JobStatus::Completed {
                return Err(GenerationError::NotReady(id.to_string()));
            }
            record.handle.clone()
        };

        let mut result = self.adapter.fetch(&handle).await;
        if matches!(result, Err(GenerationError::ConnectionUnavailable(_))) {
            if let Some(moved) = self.relocate(id, &handle).await {
                result = self.adapter.fetch(&moved).await;
            }
        }
        let bytes = result.map_err(|e| {
            tracing::warn!(job_id = %id, error = %e, "Fetching result failed");
            e
        })?;
        self.jobs.write().await.remove(&id);
        tracing::info!(job_id = %id, bytes = bytes.len(), "Result delivered");
        Ok(bytes)
    }

    /// Whether the backend can take work right now. Hosted providers are
    /// assumed reachable.
    pub async fn is_endpoint_reachable(&self) -> bool {
        if !self.adapter.requires_endpoint() {
            return true;
        }
        match &self.resolver {
            Some(resolver) => resolver.is_reachable().await,
            None => false,
        }
    }

    pub async fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs.read().await.get(&id).map(JobRecord::snapshot)
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    // ---- private helpers ----

    async fn resolve_endpoint(&self) -> Result<String, GenerationError> {
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            GenerationError::ConnectionUnavailable("No endpoint resolver configured".to_string())
        })?;
        resolver.resolve().await.ok_or_else(|| {
            GenerationError::ConnectionUnavailable("No reachable backend endpoint".to_string())
        })
    }

    fn invalidate_endpoint(&self) {
        if let Some(resolver) = &self.resolver {
            resolver.invalidate();
        }
    }

    /// Re-resolve the endpoint after a transport failure and point the job
    /// at the new address. Returns the updated handle only when the address
    /// actually changed.
    async fn relocate(&self, id: JobId, handle: &JobHandle) -> Option<JobHandle> {
        if !self.adapter.requires_endpoint() {
            return None;
        }
        let resolver = self.resolver.as_ref()?;
        resolver.invalidate();
        let address = resolver.resolve().await?;
        if handle.endpoint.as_deref() == Some(address.as_str()) {
            return None;
        }

        let mut jobs = self.jobs.write().await;
        let record = jobs.get_mut(&id)?;
        tracing::info!(
            job_id = %id,
            from = handle.endpoint.as_deref().unwrap_or_default(),
            to = %address,
            "Job moved to new endpoint",
        );
        record.handle.endpoint = Some(address);
        Some(record.handle.clone())
    }

    /// Move a job forward; backward or repeated transitions are ignored.
    /// Returns the status after the attempt.
    async fn advance(&self, id: JobId, next: JobStatus, error: Option<String>) -> JobStatus {
        let mut jobs = self.jobs.write().await;
        let Some(record) = jobs.get_mut(&id) else {
            return JobStatus::Failed;
        };
        if !record.status.can_advance_to(next) {
            return record.status;
        }

        let previous = record.status;
        record.status = next;
        record.updated_at = Utc::now();
        if error.is_some() {
            record.error = error;
        }

        match next {
            JobStatus::Failed | JobStatus::TimedOut => tracing::warn!(
                job_id = %id,
                backend = %record.handle.backend,
                from = %previous,
                to = %next,
                error = record.error.as_deref().unwrap_or_default(),
                "Job ended without result",
            ),
            _ => tracing::info!(
                job_id = %id,
                backend = %record.handle.backend,
                from = %previous,
                to = %next,
                "Job status changed",
            ),
        }
        next
    }

    async fn sweep_expired(&self) {
        let retention = self.retention;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| record.started.elapsed() < retention);
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Swept expired jobs");
        }
    }
}
