use std::sync::Arc;

use photoforge_core::throttle::SubmissionThrottle;
use photoforge_pipeline::orchestrator::JobOrchestrator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Job registry and the configured backend adapter.
    pub orchestrator: Arc<JobOrchestrator>,
    /// Per-user submission throttle.
    pub throttle: Arc<SubmissionThrottle>,
}
