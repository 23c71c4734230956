//! Queue manager: the job state machine over the shared store.
//!
//! Every transition that touches more than one key is a single
//! [`Transaction`], so a job id is always in exactly the collection its
//! record's state names. Retry, requeue and dead-letter moves are guarded on
//! membership of the source list; of two concurrent callers only one wins,
//! the other gets [`JobError::JobNotFound`].

use crate::clock::{Clock, SystemClock};
use crate::error::{JobError, JobResult};
use crate::job::{encode_timestamp, fields, JobId, JobRecord, JobState};
use crate::metrics::JobMetrics;
use crate::priority::PriorityQueue;
use crate::status::{percentage, LatencyStats, QueueMetrics, QueueSummary, SystemMetrics};
use crate::store::{Claim, Guard, Store, StoreKeys, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A job to be enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    id: Option<JobId>,
    queue: String,
    job_type: String,
    payload: serde_json::Value,
    priority: i32,
}

impl NewJob {
    /// Creates a job of `job_type` for `queue` with a null payload and
    /// priority 0.
    pub fn new(queue: impl Into<String>, job_type: impl Into<String>) -> Self {
        Self {
            id: None,
            queue: queue.into(),
            job_type: job_type.into(),
            payload: serde_json::Value::Null,
            priority: 0,
        }
    }

    /// Sets the payload.
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the priority. Lower is served first.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Uses a producer-chosen id instead of a generated one.
    ///
    /// The id must be unique; enqueuing an id that already has a record
    /// overwrites it.
    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Orchestrates enqueue, dequeue and every state transition.
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<dyn Store>,
    keys: StoreKeys,
    priority: PriorityQueue,
    clock: Arc<dyn Clock>,
}

impl QueueManager {
    /// Create a queue manager using the system clock.
    pub fn new(store: Arc<dyn Store>, key_prefix: impl Into<String>) -> Self {
        Self::with_clock(store, key_prefix, Arc::new(SystemClock))
    }

    /// Create a queue manager with an explicit clock.
    pub fn with_clock(
        store: Arc<dyn Store>,
        key_prefix: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let keys = StoreKeys::new(key_prefix);
        Self {
            priority: PriorityQueue::new(store.clone(), keys.clone()),
            store,
            keys,
            clock,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The key layout.
    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    /// The clock used for timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Checks the store is reachable.
    pub async fn health_check(&self) -> JobResult<()> {
        self.store.ping().await
    }

    // =========================================================================
    // Producer side
    // =========================================================================

    /// Enqueues a job and returns its generated id.
    pub async fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        priority: i32,
    ) -> JobResult<JobId> {
        self.submit(NewJob::new(queue, job_type).payload(payload).priority(priority))
            .await
    }

    /// Enqueues a job built with [`NewJob`].
    ///
    /// The record and the priority entry are written together, so the job
    /// is never visible to dequeue without its record.
    pub async fn submit(&self, job: NewJob) -> JobResult<JobId> {
        let id = job.id.unwrap_or_default();
        let record = JobRecord::new(
            id.clone(),
            job.queue.as_str(),
            job.job_type.as_str(),
            job.payload,
            job.priority,
            self.clock.now(),
        );

        let tx = Transaction::new().hset(self.keys.job(id.as_str()), record.to_fields()?);
        let tx = self
            .priority
            .stage_insert(tx, &job.queue, &id, job.priority)
            .await?;
        self.store.exec(tx).await?;

        JobMetrics::job_enqueued(&job.queue, &job.job_type);
        debug!(
            job_id = %id,
            queue = %job.queue,
            job_type = %job.job_type,
            priority = job.priority,
            "Enqueued job"
        );

        Ok(id)
    }

    // =========================================================================
    // Worker side
    // =========================================================================

    /// Atomically takes the best waiting job of `queue` and marks it active.
    ///
    /// Does the work of [`QueueManager::dequeue_next`] and
    /// [`QueueManager::move_to_active`] in one store operation, so a store
    /// failure leaves the job either waiting or active, never in between.
    pub async fn claim_next(&self, queue: &str) -> JobResult<Option<JobId>> {
        let claim = Claim {
            zset: self.keys.priority_queue(queue),
            list: self.keys.active(queue),
            record_prefix: self.keys.job_prefix(),
            fields: record_fields(&[
                (fields::STATE, JobState::Active.to_string()),
                (fields::STARTED_AT, encode_timestamp(self.clock.now())),
            ]),
        };

        let job_id = self.store.claim_lowest(&claim).await?.map(JobId::from);
        if let Some(id) = &job_id {
            JobMetrics::job_dequeued(queue);
            debug!(job_id = %id, queue = %queue, "Claimed job");
        }
        Ok(job_id)
    }

    /// Atomically removes the best waiting job of `queue`.
    ///
    /// The job is out of the priority structure but not yet in the active
    /// list until [`QueueManager::move_to_active`] runs.
    pub async fn dequeue_next(&self, queue: &str) -> JobResult<Option<JobId>> {
        let job_id = self.priority.pop_highest(queue).await?;
        if let Some(id) = &job_id {
            JobMetrics::job_dequeued(queue);
            debug!(job_id = %id, queue = %queue, "Dequeued job");
        }
        Ok(job_id)
    }

    /// Marks a claimed job as executing.
    pub async fn move_to_active(&self, queue: &str, job_id: &JobId) -> JobResult<()> {
        let active = self.keys.active(queue);
        let tx = Transaction::new()
            .lrem(active.as_str(), job_id.as_str())
            .rpush(active, job_id.as_str())
            .hset(
                self.keys.job(job_id.as_str()),
                record_fields(&[
                    (fields::STATE, JobState::Active.to_string()),
                    (fields::STARTED_AT, encode_timestamp(self.clock.now())),
                ]),
            );
        self.store.exec(tx).await?;

        debug!(job_id = %job_id, queue = %queue, "Job active");
        Ok(())
    }

    /// Records a processor result.
    pub async fn move_to_completed(
        &self,
        queue: &str,
        job_id: &JobId,
        result: &serde_json::Value,
    ) -> JobResult<()> {
        let tx = Transaction::new()
            .lrem(self.keys.active(queue), job_id.as_str())
            .rpush(self.keys.completed(queue), job_id.as_str())
            .hset(
                self.keys.job(job_id.as_str()),
                record_fields(&[
                    (fields::STATE, JobState::Completed.to_string()),
                    (fields::COMPLETED_AT, encode_timestamp(self.clock.now())),
                    (fields::RESULT, serde_json::to_string(result)?),
                ]),
            );
        self.store.exec(tx).await?;

        debug!(job_id = %job_id, queue = %queue, "Job completed");
        Ok(())
    }

    /// Records a processor failure.
    ///
    /// Also used for claimed jobs whose record is missing; the queue and id
    /// are written so the resulting record can still be retried.
    pub async fn move_to_failed(&self, queue: &str, job_id: &JobId, error: &str) -> JobResult<()> {
        let failed = self.keys.failed(queue);
        let index = self.keys.failed_index();
        let tx = Transaction::new()
            .lrem(self.keys.active(queue), job_id.as_str())
            .lrem(failed.as_str(), job_id.as_str())
            .rpush(failed, job_id.as_str())
            .lrem(index.as_str(), job_id.as_str())
            .rpush(index, job_id.as_str())
            .hset(
                self.keys.job(job_id.as_str()),
                record_fields(&[
                    (fields::ID, job_id.to_string()),
                    (fields::QUEUE, queue.to_string()),
                    (fields::STATE, JobState::Failed.to_string()),
                    (fields::FAILED_AT, encode_timestamp(self.clock.now())),
                    (fields::ERROR, error.to_string()),
                ]),
            );
        self.store.exec(tx).await?;

        debug!(job_id = %job_id, queue = %queue, error = %error, "Job failed");
        Ok(())
    }

    /// Increments the attempt counter and returns the new value.
    pub async fn record_attempt(&self, job_id: &JobId) -> JobResult<u32> {
        let attempts = self
            .store
            .hincr(&self.keys.job(job_id.as_str()), fields::ATTEMPTS, 1)
            .await?;
        u32::try_from(attempts).map_err(|_| {
            JobError::inconsistency(job_id.as_str(), format!("attempts out of range: {}", attempts))
        })
    }

    // =========================================================================
    // Operator side
    // =========================================================================

    /// Increments the failure count used for dead-letter escalation and
    /// returns the new value.
    pub async fn record_failure(&self, job_id: &JobId) -> JobResult<u32> {
        let failures = self
            .store
            .hincr(&self.keys.job(job_id.as_str()), fields::FAILURES, 1)
            .await?;
        u32::try_from(failures).map_err(|_| {
            JobError::inconsistency(job_id.as_str(), format!("failures out of range: {}", failures))
        })
    }

    /// Puts a failed job back in its queue with attempts reset.
    ///
    /// The failure count is kept.
    pub async fn retry_failed_job(&self, job_id: &JobId) -> JobResult<()> {
        let index = self.keys.failed_index();
        let record = self.load_member(job_id, &index).await?;

        let tx = Transaction::new()
            .guard(Guard::list_contains(index.as_str(), job_id.as_str()))
            .lrem(index, job_id.as_str())
            .lrem(self.keys.failed(&record.queue), job_id.as_str());
        let tx = self.stage_back_to_waiting(tx, &record, false).await?;

        if !self.store.exec(tx).await? {
            return Err(JobError::JobNotFound(job_id.to_string()));
        }

        JobMetrics::job_retried(&record.queue);
        info!(job_id = %job_id, queue = %record.queue, "Retried failed job");
        Ok(())
    }

    /// Parks a failed job in the dead-letter list.
    pub async fn move_to_dead_letter(&self, job_id: &JobId) -> JobResult<()> {
        let index = self.keys.failed_index();
        let record = self.load_member(job_id, &index).await?;

        let tx = Transaction::new()
            .guard(Guard::list_contains(index.as_str(), job_id.as_str()))
            .lrem(index, job_id.as_str())
            .lrem(self.keys.failed(&record.queue), job_id.as_str())
            .rpush(self.keys.dead_letter(), job_id.as_str())
            .hset(
                self.keys.job(job_id.as_str()),
                record_fields(&[(fields::STATE, JobState::Dead.to_string())]),
            );

        if !self.store.exec(tx).await? {
            return Err(JobError::JobNotFound(job_id.to_string()));
        }

        JobMetrics::job_dead_lettered(&record.queue);
        warn!(
            job_id = %job_id,
            queue = %record.queue,
            attempts = record.attempts,
            error = %record.error_message(),
            "Job moved to dead letter"
        );
        Ok(())
    }

    /// Puts a dead job back in its queue with attempts and the failure count
    /// reset.
    pub async fn requeue_dead_job(&self, job_id: &JobId) -> JobResult<()> {
        let dead = self.keys.dead_letter();
        let record = self.load_member(job_id, &dead).await?;

        let tx = Transaction::new()
            .guard(Guard::list_contains(dead.as_str(), job_id.as_str()))
            .lrem(dead, job_id.as_str());
        let tx = self.stage_back_to_waiting(tx, &record, true).await?;

        if !self.store.exec(tx).await? {
            return Err(JobError::JobNotFound(job_id.to_string()));
        }

        JobMetrics::job_requeued(&record.queue);
        info!(job_id = %job_id, queue = %record.queue, "Requeued dead job");
        Ok(())
    }

    /// Pauses or resumes a queue. Workers skip paused queues.
    pub async fn set_queue_paused(&self, queue: &str, paused: bool) -> JobResult<()> {
        self.store
            .set(&self.keys.paused(queue), if paused { "1" } else { "0" })
            .await?;
        info!(queue = %queue, paused = paused, "Queue pause flag set");
        Ok(())
    }

    /// Returns whether a queue is paused. Unset means not paused.
    pub async fn is_queue_paused(&self, queue: &str) -> JobResult<bool> {
        let flag = self.store.get(&self.keys.paused(queue)).await?;
        Ok(flag.as_deref() == Some("1"))
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Reads a job record.
    pub async fn get_job_by_id(&self, job_id: &JobId) -> JobResult<Option<JobRecord>> {
        let map = self.store.hgetall(&self.keys.job(job_id.as_str())).await?;
        JobRecord::from_fields(job_id, &map)
    }

    /// Records of every job in the global failed index.
    pub async fn list_failed_jobs(&self) -> JobResult<Vec<JobRecord>> {
        let ids = self.failed_job_ids().await?;
        self.load_records(&ids).await
    }

    /// Records of every dead-lettered job.
    pub async fn list_dead_letter_jobs(&self) -> JobResult<Vec<JobRecord>> {
        let ids = self.dead_letter_ids().await?;
        self.load_records(&ids).await
    }

    /// Waiting job ids of `queue` in service order.
    pub async fn list_waiting(&self, queue: &str) -> JobResult<Vec<JobId>> {
        self.priority.ids(queue).await
    }

    /// Job ids of `queue` in the collection for `state`.
    ///
    /// Dead jobs are not partitioned by queue; [`JobState::Dead`] returns the
    /// whole dead-letter list.
    pub async fn job_ids(&self, queue: &str, state: JobState) -> JobResult<Vec<JobId>> {
        let key = match state {
            JobState::Waiting => return self.priority.ids(queue).await,
            JobState::Dead => return self.dead_letter_ids().await,
            JobState::Active => self.keys.active(queue),
            JobState::Completed => self.keys.completed(queue),
            JobState::Failed => self.keys.failed(queue),
        };
        Ok(to_ids(self.store.lrange_all(&key).await?))
    }

    /// Ids in the global failed index.
    pub async fn failed_job_ids(&self) -> JobResult<Vec<JobId>> {
        Ok(to_ids(self.store.lrange_all(&self.keys.failed_index()).await?))
    }

    /// Ids in the dead-letter list.
    pub async fn dead_letter_ids(&self) -> JobResult<Vec<JobId>> {
        Ok(to_ids(self.store.lrange_all(&self.keys.dead_letter()).await?))
    }

    /// Counts per state of one queue.
    pub async fn get_queue_summary(&self, queue: &str) -> JobResult<QueueSummary> {
        Ok(QueueSummary {
            name: queue.to_string(),
            waiting: self.priority.len(queue).await?,
            active: self.store.llen(&self.keys.active(queue)).await?,
            completed: self.store.llen(&self.keys.completed(queue)).await?,
            failed: self.store.llen(&self.keys.failed(queue)).await?,
            paused: self.is_queue_paused(queue).await?,
        })
    }

    /// Counts plus latency and success/failure rates of one queue.
    ///
    /// Rates are over every job currently waiting, active, completed or
    /// failed in the queue.
    pub async fn get_queue_metrics(&self, queue: &str) -> JobResult<QueueMetrics> {
        let summary = self.get_queue_summary(queue).await?;

        let mut ids = Vec::new();
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
        ] {
            ids.extend(self.job_ids(queue, state).await?);
        }
        let records = self.load_records(&ids).await?;

        let latencies = records
            .iter()
            .filter_map(JobRecord::latency)
            .map(|latency| latency.num_milliseconds())
            .collect();
        let observed = records.len() as u64;
        let completed = count_in_state(&records, JobState::Completed);
        let failed = count_in_state(&records, JobState::Failed);

        Ok(QueueMetrics {
            summary,
            latency: LatencyStats::from_samples(latencies),
            success_rate: percentage(completed, observed),
            failure_rate: percentage(failed, observed),
        })
    }

    /// Totals across `queues` plus the dead-letter size.
    pub async fn get_system_metrics(&self, queues: &[String]) -> JobResult<SystemMetrics> {
        let mut summaries = Vec::with_capacity(queues.len());
        for queue in queues {
            summaries.push(self.get_queue_summary(queue).await?);
        }
        let dead_letter = self.store.llen(&self.keys.dead_letter()).await?;
        Ok(SystemMetrics::from_summaries(summaries, dead_letter))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Reads the record of a job expected in `list`.
    ///
    /// A missing record is `JobNotFound` unless the id is in `list`, in which
    /// case the store is inconsistent.
    async fn load_member(&self, job_id: &JobId, list: &str) -> JobResult<JobRecord> {
        if let Some(record) = self.get_job_by_id(job_id).await? {
            return Ok(record);
        }

        let members = self.store.lrange_all(list).await?;
        if members.iter().any(|m| m == job_id.as_str()) {
            Err(JobError::inconsistency(
                job_id.as_str(),
                format!("listed in {} but record is missing", list),
            ))
        } else {
            Err(JobError::JobNotFound(job_id.to_string()))
        }
    }

    /// Adds the writes that return `record` to the waiting state.
    async fn stage_back_to_waiting(
        &self,
        tx: Transaction,
        record: &JobRecord,
        reset_failures: bool,
    ) -> JobResult<Transaction> {
        let job_key = self.keys.job(record.id.as_str());
        let mut reset = record_fields(&[
            (fields::STATE, JobState::Waiting.to_string()),
            (fields::ATTEMPTS, "0".to_string()),
            (fields::QUEUED_AT, encode_timestamp(self.clock.now())),
        ]);
        if reset_failures {
            reset.push((fields::FAILURES.to_string(), "0".to_string()));
        }
        let tx = tx
            .hdel(job_key.as_str(), fields::RESET_ON_REQUEUE)
            .hset(job_key, reset);
        self.priority
            .stage_insert(tx, &record.queue, &record.id, record.priority)
            .await
    }

    /// Loads records, skipping ids whose record is missing or corrupt.
    async fn load_records(&self, ids: &[JobId]) -> JobResult<Vec<JobRecord>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.get_job_by_id(id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => warn!(job_id = %id, "Listed job has no record"),
                Err(JobError::RecordInconsistency { message, .. }) => {
                    warn!(job_id = %id, reason = %message, "Skipping corrupt job record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }
}

fn record_fields(pairs: &[(&str, String)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}

fn to_ids(members: Vec<String>) -> Vec<JobId> {
    members.into_iter().map(JobId::from).collect()
}

fn count_in_state(records: &[JobRecord], state: JobState) -> u64 {
    records.iter().filter(|r| r.state == state).count() as u64
}
