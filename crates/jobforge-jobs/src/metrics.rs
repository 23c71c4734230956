//! Queue and worker metrics.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding process.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Metric names for the job queue system.
pub mod names {
    /// Total jobs enqueued.
    pub const JOBS_ENQUEUED_TOTAL: &str = "jobforge_jobs_enqueued_total";
    /// Total jobs dequeued for processing.
    pub const JOBS_DEQUEUED_TOTAL: &str = "jobforge_jobs_dequeued_total";
    /// Total jobs completed successfully.
    pub const JOBS_COMPLETED_TOTAL: &str = "jobforge_jobs_completed_total";
    /// Total jobs failed.
    pub const JOBS_FAILED_TOTAL: &str = "jobforge_jobs_failed_total";
    /// Total failed jobs put back in their queue.
    pub const JOBS_RETRIED_TOTAL: &str = "jobforge_jobs_retried_total";
    /// Total jobs moved to the dead-letter list.
    pub const JOBS_DEAD_LETTERED_TOTAL: &str = "jobforge_jobs_dead_lettered_total";
    /// Total dead jobs put back in their queue.
    pub const JOBS_REQUEUED_TOTAL: &str = "jobforge_jobs_requeued_total";
    /// Total claimed jobs whose record was missing or corrupt.
    pub const RECORD_INCONSISTENCIES_TOTAL: &str = "jobforge_jobs_record_inconsistencies_total";

    /// Processor execution duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "jobforge_jobs_duration_seconds";

    /// Jobs currently executing in a worker.
    pub const WORKER_IN_FLIGHT: &str = "jobforge_jobs_worker_in_flight";
    /// Worker concurrency bound.
    pub const WORKER_CONCURRENCY: &str = "jobforge_jobs_worker_concurrency";
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(names::JOBS_ENQUEUED_TOTAL, "Total number of jobs enqueued");
    describe_counter!(
        names::JOBS_DEQUEUED_TOTAL,
        "Total number of jobs dequeued for processing"
    );
    describe_counter!(
        names::JOBS_COMPLETED_TOTAL,
        "Total number of jobs completed successfully"
    );
    describe_counter!(names::JOBS_FAILED_TOTAL, "Total number of jobs that failed");
    describe_counter!(
        names::JOBS_RETRIED_TOTAL,
        "Total number of failed jobs retried"
    );
    describe_counter!(
        names::JOBS_DEAD_LETTERED_TOTAL,
        "Total number of jobs moved to the dead-letter list"
    );
    describe_counter!(
        names::JOBS_REQUEUED_TOTAL,
        "Total number of dead jobs requeued"
    );
    describe_counter!(
        names::RECORD_INCONSISTENCIES_TOTAL,
        "Total number of claimed jobs with a missing or corrupt record"
    );

    describe_histogram!(
        names::JOB_DURATION_SECONDS,
        "Processor execution duration in seconds"
    );

    describe_gauge!(
        names::WORKER_IN_FLIGHT,
        "Number of jobs currently executing in the worker"
    );
    describe_gauge!(names::WORKER_CONCURRENCY, "Worker concurrency bound");
}

/// Job lifecycle metrics recorder.
#[derive(Clone)]
pub struct JobMetrics;

impl JobMetrics {
    /// Record a job enqueued.
    pub fn job_enqueued(queue: &str, job_type: &str) {
        counter!(
            names::JOBS_ENQUEUED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string()
        )
        .increment(1);
    }

    /// Record a job dequeued.
    pub fn job_dequeued(queue: &str) {
        counter!(names::JOBS_DEQUEUED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a job completed.
    pub fn job_completed(queue: &str, job_type: &str, duration: Duration) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "status" => "completed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a job failed.
    pub fn job_failed(queue: &str, job_type: &str, duration: Duration) {
        counter!(
            names::JOBS_FAILED_TOTAL,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string()
        )
        .increment(1);

        histogram!(
            names::JOB_DURATION_SECONDS,
            "queue" => queue.to_string(),
            "job_type" => job_type.to_string(),
            "status" => "failed"
        )
        .record(duration.as_secs_f64());
    }

    /// Record a failed job retried.
    pub fn job_retried(queue: &str) {
        counter!(names::JOBS_RETRIED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a job dead-lettered.
    pub fn job_dead_lettered(queue: &str) {
        counter!(names::JOBS_DEAD_LETTERED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a dead job requeued.
    pub fn job_requeued(queue: &str) {
        counter!(names::JOBS_REQUEUED_TOTAL, "queue" => queue.to_string()).increment(1);
    }

    /// Record a claimed job whose record could not be read.
    pub fn record_inconsistency(queue: &str) {
        counter!(
            names::RECORD_INCONSISTENCIES_TOTAL,
            "queue" => queue.to_string()
        )
        .increment(1);
    }
}

/// Worker metrics recorder.
#[derive(Clone)]
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// Update the in-flight gauges.
    pub fn update_in_flight(worker_id: &str, in_flight: usize, concurrency: usize) {
        gauge!(
            names::WORKER_IN_FLIGHT,
            "worker_id" => worker_id.to_string()
        )
        .set(in_flight as f64);

        gauge!(
            names::WORKER_CONCURRENCY,
            "worker_id" => worker_id.to_string()
        )
        .set(concurrency as f64);
    }
}
