/// Errors raised while loading templates or configuration.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} '{id}'")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Shared failure taxonomy for the generation pipeline.
///
/// Every backend adapter translates its provider-specific failures into one
/// of these variants before they leave the adapter, so callers never see
/// provider vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    /// The template could not be normalized, or a role-mapped node is missing.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// No endpoint could be resolved, or the resolved one is unreachable.
    #[error("Backend unavailable: {0}")]
    ConnectionUnavailable(String),

    /// The transport succeeded but the provider refused the job.
    #[error("Provider rejected the job: {0}")]
    ProviderRejected(String),

    /// No terminal state was observed within the time budget.
    #[error("Timed out waiting for the job")]
    Timeout,

    /// The provider reported success but no asset could be retrieved.
    #[error("Generation produced no output")]
    OutputMissing,

    #[error("Job {0} not found")]
    JobNotFound(String),

    /// The job has not reached `Completed` yet.
    #[error("Job {0} is not complete")]
    NotReady(String),
}

impl GenerationError {
    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::ConnectionUnavailable(_) | GenerationError::Timeout
        )
    }
}
