/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier handed to callers for a submitted generation job.
pub type JobId = uuid::Uuid;
