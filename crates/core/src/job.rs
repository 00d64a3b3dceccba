//! Canonical job lifecycle shared by every backend.

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Provider-independent job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// Exceeded the backend's time budget; distinct from `Failed`.
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut => 2,
        }
    }

    /// Whether moving from `self` to `next` goes strictly forward.
    /// Terminal states never move again.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status as reported by a backend adapter, already stripped of provider
/// vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    Running,
    Completed,
    /// Terminal failure with a short reason for logs.
    Failed(String),
}

impl RemoteStatus {
    pub fn status(&self) -> JobStatus {
        match self {
            RemoteStatus::Queued => JobStatus::Queued,
            RemoteStatus::Running => JobStatus::Running,
            RemoteStatus::Completed => JobStatus::Completed,
            RemoteStatus::Failed(_) => JobStatus::Failed,
        }
    }
}

/// Everything an adapter needs to find a submitted job again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Adapter name that issued the handle.
    pub backend: String,
    /// Provider-side job identifier.
    pub remote_id: String,
    /// Base address for self-hosted backends.
    pub endpoint: Option<String>,
}

impl JobHandle {
    pub fn new(backend: &str, remote_id: impl Into<String>) -> Self {
        Self {
            backend: backend.to_string(),
            remote_id: remote_id.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Point-in-time view of a job for callers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub backend: String,
    pub template_id: String,
    pub status: JobStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Set once the job ends in `Failed` or `TimedOut`.
    pub error: Option<String>,
}
