//! Dependency injection interfaces for the jobs module.
//!
//! Provides a Shaku-compatible facade over the queue manager and the
//! liveness registry for request layers and operator tooling.

use crate::error::JobResult;
use crate::job::{JobId, JobRecord};
use crate::liveness::{LivenessRegistry, WorkerStatus};
use crate::manager::{NewJob, QueueManager};
use crate::status::{QueueMetrics, QueueSummary, SystemMetrics};
use async_trait::async_trait;
use jobforge_core::Interface;
use std::sync::Arc;

/// Queue operations exposed to request layers.
#[async_trait]
pub trait QueueServiceInterface: Interface + Send + Sync {
    /// Enqueue a job.
    async fn enqueue(&self, job: NewJob) -> JobResult<JobId>;

    /// Get job by ID.
    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>>;

    /// Counts per state of one queue.
    async fn get_queue_summary(&self, queue: &str) -> JobResult<QueueSummary>;

    /// Counts, latency and rates of one queue.
    async fn get_queue_metrics(&self, queue: &str) -> JobResult<QueueMetrics>;

    /// Totals across the managed queues.
    async fn get_system_metrics(&self) -> JobResult<SystemMetrics>;

    /// Pause or resume a queue.
    async fn set_queue_paused(&self, queue: &str, paused: bool) -> JobResult<()>;

    /// Whether a queue is paused.
    async fn is_queue_paused(&self, queue: &str) -> JobResult<bool>;

    /// Retry a failed job.
    async fn retry_failed_job(&self, job_id: &JobId) -> JobResult<()>;

    /// Move a failed job to the dead-letter list.
    async fn move_to_dead_letter(&self, job_id: &JobId) -> JobResult<()>;

    /// Requeue a dead job.
    async fn requeue_dead_job(&self, job_id: &JobId) -> JobResult<()>;

    /// Records of every failed job.
    async fn list_failed_jobs(&self) -> JobResult<Vec<JobRecord>>;

    /// Records of every dead-lettered job.
    async fn list_dead_letter_jobs(&self) -> JobResult<Vec<JobRecord>>;

    /// Status of every worker that ever reported.
    async fn list_workers(&self) -> JobResult<Vec<WorkerStatus>>;

    /// Get the list of queue names being managed.
    fn queue_names(&self) -> &[String];
}

/// Queue service implementation.
pub struct QueueService {
    manager: Arc<QueueManager>,
    liveness: Arc<LivenessRegistry>,
    queue_names: Vec<String>,
}

impl QueueService {
    /// Create a new queue service.
    pub fn new(
        manager: Arc<QueueManager>,
        liveness: Arc<LivenessRegistry>,
        queue_names: Vec<String>,
    ) -> Self {
        Self {
            manager,
            liveness,
            queue_names,
        }
    }
}

#[async_trait]
impl QueueServiceInterface for QueueService {
    async fn enqueue(&self, job: NewJob) -> JobResult<JobId> {
        self.manager.submit(job).await
    }

    async fn get_job(&self, job_id: &JobId) -> JobResult<Option<JobRecord>> {
        self.manager.get_job_by_id(job_id).await
    }

    async fn get_queue_summary(&self, queue: &str) -> JobResult<QueueSummary> {
        self.manager.get_queue_summary(queue).await
    }

    async fn get_queue_metrics(&self, queue: &str) -> JobResult<QueueMetrics> {
        self.manager.get_queue_metrics(queue).await
    }

    async fn get_system_metrics(&self) -> JobResult<SystemMetrics> {
        self.manager.get_system_metrics(&self.queue_names).await
    }

    async fn set_queue_paused(&self, queue: &str, paused: bool) -> JobResult<()> {
        self.manager.set_queue_paused(queue, paused).await
    }

    async fn is_queue_paused(&self, queue: &str) -> JobResult<bool> {
        self.manager.is_queue_paused(queue).await
    }

    async fn retry_failed_job(&self, job_id: &JobId) -> JobResult<()> {
        self.manager.retry_failed_job(job_id).await
    }

    async fn move_to_dead_letter(&self, job_id: &JobId) -> JobResult<()> {
        self.manager.move_to_dead_letter(job_id).await
    }

    async fn requeue_dead_job(&self, job_id: &JobId) -> JobResult<()> {
        self.manager.requeue_dead_job(job_id).await
    }

    async fn list_failed_jobs(&self) -> JobResult<Vec<JobRecord>> {
        self.manager.list_failed_jobs().await
    }

    async fn list_dead_letter_jobs(&self) -> JobResult<Vec<JobRecord>> {
        self.manager.list_dead_letter_jobs().await
    }

    async fn list_workers(&self) -> JobResult<Vec<WorkerStatus>> {
        self.liveness.list_workers().await
    }

    fn queue_names(&self) -> &[String] {
        &self.queue_names
    }
}
