//! Job queue error types.

use jobforge_core::ForgeError;
use thiserror::Error;

/// Result type for job queue operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job queue errors.
///
/// Processor failures are not part of this enum: they are ordinary outcomes
/// recorded on the job (see [`crate::processor::ProcessorError`]).
#[derive(Debug, Error)]
pub enum JobError {
    /// Job is not where the operation expected it (absent, or not in the
    /// failed / dead-letter index).
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// A job id was found in a collection but its record is missing or
    /// unreadable.
    #[error("Record inconsistency for job {job_id}: {message}")]
    RecordInconsistency { job_id: String, message: String },

    /// Store unreachable or a store operation failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Creates a record inconsistency error.
    pub fn inconsistency(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RecordInconsistency {
            job_id: job_id.into(),
            message: message.into(),
        }
    }

    /// Returns true if the failed operation may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::StoreUnavailable(_))
    }

    /// Returns true if this is a [`JobError::JobNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, JobError::JobNotFound(_))
    }
}

impl From<redis::RedisError> for JobError {
    fn from(err: redis::RedisError) -> Self {
        JobError::StoreUnavailable(err.to_string())
    }
}

impl From<deadpool_redis::PoolError> for JobError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        JobError::StoreUnavailable(format!("pool: {}", err))
    }
}

impl From<JobError> for ForgeError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::JobNotFound(id) => ForgeError::not_found("Job", id),
            JobError::RecordInconsistency { .. } => ForgeError::Inconsistency(err.to_string()),
            JobError::StoreUnavailable(msg) => ForgeError::StoreUnavailable(msg),
            JobError::Serialization(e) => ForgeError::from(e),
            JobError::Configuration(msg) => ForgeError::Configuration(msg),
            JobError::Internal(msg) => ForgeError::Internal(msg),
        }
    }
}
