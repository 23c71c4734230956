//! Job processors and the registry that selects them by job type.

use crate::job::JobRecord;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Job type served by the fallback processor.
pub const DEFAULT_PROCESSOR: &str = "default";

/// Business-logic failure reported by a processor.
///
/// The message is stored verbatim as the job's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessorError {
    message: String,
}

impl ProcessorError {
    /// Creates a processor error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProcessorError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProcessorError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid payload: {}", err))
    }
}

/// Outcome of a processor run.
pub type ProcessorResult = Result<serde_json::Value, ProcessorError>;

/// Executes jobs of one or more types.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes a job and returns its result.
    async fn process(&self, job: &JobRecord) -> ProcessorResult;
}

/// Processor function type.
pub type ProcessorFn = Box<dyn Fn(JobRecord) -> BoxFuture<'static, ProcessorResult> + Send + Sync>;

struct FnProcessor(ProcessorFn);

#[async_trait]
impl Processor for FnProcessor {
    async fn process(&self, job: &JobRecord) -> ProcessorResult {
        (self.0)(job.clone()).await
    }
}

/// Maps job types to processors, with a mandatory fallback.
#[derive(Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
    fallback: Arc<dyn Processor>,
}

impl ProcessorRegistry {
    /// Creates a registry whose fallback serves every unregistered type.
    pub fn new(fallback: impl Processor + 'static) -> Self {
        Self {
            processors: HashMap::new(),
            fallback: Arc::new(fallback),
        }
    }

    /// Creates a registry with a function as fallback.
    pub fn with_default_fn<F>(fallback: F) -> Self
    where
        F: Fn(JobRecord) -> BoxFuture<'static, ProcessorResult> + Send + Sync + 'static,
    {
        Self::new(FnProcessor(Box::new(fallback)))
    }

    /// Registers a processor for a job type.
    #[must_use]
    pub fn register(
        mut self,
        job_type: impl Into<String>,
        processor: impl Processor + 'static,
    ) -> Self {
        let job_type = job_type.into();
        info!(job_type = %job_type, "Registered job processor");
        self.processors.insert(job_type, Arc::new(processor));
        self
    }

    /// Registers a processor function for a job type.
    #[must_use]
    pub fn register_fn<F>(self, job_type: impl Into<String>, processor: F) -> Self
    where
        F: Fn(JobRecord) -> BoxFuture<'static, ProcessorResult> + Send + Sync + 'static,
    {
        self.register(job_type, FnProcessor(Box::new(processor)))
    }

    /// Processor for `job_type`, or the fallback.
    pub fn resolve(&self, job_type: &str) -> Arc<dyn Processor> {
        self.processors
            .get(job_type)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Returns true if `job_type` has its own processor.
    pub fn contains(&self, job_type: &str) -> bool {
        self.processors.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("job_types", &self.job_types())
            .finish_non_exhaustive()
    }
}
