//! Worker scheduler: sweeps queues and runs jobs under a concurrency bound.
//!
//! One sweep visits every configured queue once, in order. For each queue
//! that is not paused it tries to take an execution slot and claim one job;
//! claimed jobs run on their own task so a slow processor never blocks the
//! sweep. A sweep that claims nothing is followed by the idle back-off.
//!
//! A claim moves the job from waiting to active in one store operation, so
//! a store error during the sweep leaves the job waiting for the next one.
//!
//! Slots are semaphore permits. A permit is taken before the claim and
//! moves into the job task, so the in-flight count can never exceed the
//! concurrency bound and is released on every exit path, panics included.

use crate::error::{JobError, JobResult};
use crate::escalation::EscalationPolicy;
use crate::job::{JobId, JobRecord};
use crate::liveness::{LivenessRegistry, DEFAULT_HEARTBEAT_INTERVAL};
use crate::manager::QueueManager;
use crate::metrics::{JobMetrics, WorkerMetrics};
use crate::processor::{ProcessorError, ProcessorRegistry, ProcessorResult};
use futures::FutureExt;
use jobforge_config::WorkerConfig;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Worker scheduler configuration.
#[derive(Debug, Clone)]
pub struct WorkerSchedulerConfig {
    /// Identifier reported in heartbeats.
    pub worker_id: String,

    /// Queues swept in round-robin order.
    pub queues: Vec<String>,

    /// Maximum number of jobs executing at once.
    pub concurrency: usize,

    /// Heartbeat interval.
    pub heartbeat_interval: Duration,

    /// Sleep after a sweep that claimed nothing.
    pub idle_backoff: Duration,

    /// Optional processor timeout.
    pub job_timeout: Option<Duration>,

    /// Automatic dead-letter escalation.
    pub escalation: EscalationPolicy,
}

impl Default for WorkerSchedulerConfig {
    fn default() -> Self {
        Self {
            worker_id: default_worker_id(),
            queues: vec!["default".to_string()],
            concurrency: 2,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_backoff: Duration::from_secs(1),
            job_timeout: None,
            escalation: EscalationPolicy::never(),
        }
    }
}

impl From<&WorkerConfig> for WorkerSchedulerConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            worker_id: config.worker_id.clone().unwrap_or_else(default_worker_id),
            queues: config.queues.clone(),
            concurrency: config.concurrency,
            heartbeat_interval: config.heartbeat_interval(),
            idle_backoff: config.idle_backoff(),
            job_timeout: config.job_timeout(),
            escalation: EscalationPolicy::from(config),
        }
    }
}

/// `{hostname}-{pid}`, with the OS hostname.
///
/// Falls back to the `HOSTNAME` variable, then to `worker`, when the OS
/// hostname cannot be read.
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().into_owned())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "worker".to_string());
    format!("{}-{}", host, std::process::id())
}

/// Counters of a scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Worker ID.
    pub worker_id: String,
    /// Jobs claimed from a queue.
    pub claimed: u64,
    /// Jobs completed.
    pub completed: u64,
    /// Jobs failed (processor error, panic, timeout or missing record).
    pub failed: u64,
    /// Failed jobs escalated to the dead-letter list.
    pub dead_lettered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    claimed: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Stops a running scheduler from another task.
#[derive(Clone)]
pub struct WorkerHandle {
    shutdown_tx: broadcast::Sender<()>,
    stop_requested: Arc<AtomicBool>,
}

impl WorkerHandle {
    /// Requests a graceful shutdown: no new claims, in-flight jobs finish.
    pub fn shutdown(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        // No receivers just means the scheduler is not running yet
        let _ = self.shutdown_tx.send(());
    }

    /// Returns true once shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

/// State shared with job tasks.
struct Executor {
    manager: Arc<QueueManager>,
    processors: Arc<ProcessorRegistry>,
    job_timeout: Option<Duration>,
    escalation: EscalationPolicy,
    counters: Counters,
}

impl Executor {
    /// Runs one claimed job to a recorded outcome.
    async fn execute(&self, queue: &str, job_id: &JobId) {
        if let Err(e) = self.try_execute(queue, job_id).await {
            // The job may be left in the active list; liveness tooling
            // surfaces it, nothing reclaims it automatically.
            error!(
                job_id = %job_id,
                queue = %queue,
                error = %e,
                "Failed to record job outcome"
            );
        }
    }

    /// The job is already active: the sweep claimed it with
    /// [`QueueManager::claim_next`].
    async fn try_execute(&self, queue: &str, job_id: &JobId) -> JobResult<()> {
        let record = match self.manager.get_job_by_id(job_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return self.fail_missing(queue, job_id, "record missing").await,
            Err(JobError::RecordInconsistency { message, .. }) => {
                return self.fail_missing(queue, job_id, &message).await;
            }
            Err(e) => return Err(e),
        };

        debug!(job_id = %job_id, job_type = %record.job_type, "Processing job");

        let started = Instant::now();
        match self.run_processor(&record).await {
            Ok(result) => {
                self.manager.move_to_completed(queue, job_id, &result).await?;
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                JobMetrics::job_completed(queue, &record.job_type, started.elapsed());
                info!(
                    job_id = %job_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
            }
            Err(err) => {
                let attempts = self.manager.record_attempt(job_id).await?;
                let failures = self.manager.record_failure(job_id).await?;
                self.manager
                    .move_to_failed(queue, job_id, err.message())
                    .await?;
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                JobMetrics::job_failed(queue, &record.job_type, started.elapsed());
                warn!(
                    job_id = %job_id,
                    attempts = attempts,
                    failures = failures,
                    error = %err,
                    "Job failed"
                );

                if self.escalation.should_escalate(failures) {
                    self.manager.move_to_dead_letter(job_id).await?;
                    self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        Ok(())
    }

    /// Forces a claimed job without a usable record to failed.
    async fn fail_missing(&self, queue: &str, job_id: &JobId, reason: &str) -> JobResult<()> {
        error!(
            job_id = %job_id,
            queue = %queue,
            reason = %reason,
            severity = "high",
            "Claimed job has no usable record; marking failed"
        );
        JobMetrics::record_inconsistency(queue);

        self.manager
            .move_to_failed(queue, job_id, &format!("Job record inconsistency: {}", reason))
            .await?;
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Runs the processor for `record`, turning panics and timeouts into
    /// processor errors.
    async fn run_processor(&self, record: &JobRecord) -> ProcessorResult {
        let processor = self.processors.resolve(&record.job_type);
        let run = AssertUnwindSafe(processor.process(record)).catch_unwind();

        let outcome = match self.job_timeout {
            Some(limit) => match timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ProcessorError::new(format!(
                        "Job timed out after {}s",
                        limit.as_secs()
                    )));
                }
            },
            None => run.await,
        };

        outcome.unwrap_or_else(|panic| {
            Err(ProcessorError::new(format!(
                "Processor panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Sweeps queues and executes jobs with bounded concurrency.
pub struct WorkerScheduler {
    config: WorkerSchedulerConfig,
    manager: Arc<QueueManager>,
    liveness: Arc<LivenessRegistry>,
    executor: Arc<Executor>,
    semaphore: Arc<Semaphore>,
    shutdown_tx: broadcast::Sender<()>,
    stop_requested: Arc<AtomicBool>,
    running: AtomicBool,
}

impl WorkerScheduler {
    /// Create a new scheduler.
    ///
    /// A concurrency of zero is raised to one.
    pub fn new(
        manager: Arc<QueueManager>,
        liveness: Arc<LivenessRegistry>,
        processors: ProcessorRegistry,
        mut config: WorkerSchedulerConfig,
    ) -> Self {
        config.concurrency = config.concurrency.max(1);
        let (shutdown_tx, _) = broadcast::channel(1);

        let executor = Arc::new(Executor {
            manager: manager.clone(),
            processors: Arc::new(processors),
            job_timeout: config.job_timeout,
            escalation: config.escalation,
            counters: Counters::default(),
        });

        Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            config,
            manager,
            liveness,
            executor,
            shutdown_tx,
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    /// Handle for stopping the scheduler.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shutdown_tx: self.shutdown_tx.clone(),
            stop_requested: self.stop_requested.clone(),
        }
    }

    /// The worker ID.
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Jobs currently holding an execution slot.
    pub fn in_flight(&self) -> usize {
        self.config.concurrency - self.semaphore.available_permits()
    }

    /// Counters so far.
    pub fn stats(&self) -> WorkerStats {
        let counters = &self.executor.counters;
        WorkerStats {
            worker_id: self.config.worker_id.clone(),
            claimed: counters.claimed.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            dead_lettered: counters.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Runs until [`WorkerHandle::shutdown`] is called, then waits for every
    /// in-flight job to finish.
    pub async fn run(&self) -> JobResult<WorkerStats> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Internal(
                "Worker scheduler already running".to_string(),
            ));
        }

        info!(
            worker_id = %self.config.worker_id,
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            "Starting worker scheduler"
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let heartbeat = self.spawn_heartbeat();

        while !self.stop_requested.load(Ordering::SeqCst) {
            if self.sweep().await {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {}
                () = tokio::time::sleep(self.config.idle_backoff) => {}
            }
        }

        info!(
            worker_id = %self.config.worker_id,
            in_flight = self.in_flight(),
            "Draining in-flight jobs"
        );
        self.drain().await?;

        heartbeat.abort();
        if let Err(e) = self
            .liveness
            .record_heartbeat(&self.config.worker_id, self.config.concurrency, 0)
            .await
        {
            warn!(worker_id = %self.config.worker_id, error = %e, "Final heartbeat failed");
        }
        WorkerMetrics::update_in_flight(&self.config.worker_id, 0, self.config.concurrency);

        self.running.store(false, Ordering::SeqCst);

        let stats = self.stats();
        info!(
            worker_id = %stats.worker_id,
            completed = stats.completed,
            failed = stats.failed,
            dead_lettered = stats.dead_lettered,
            "Worker scheduler stopped"
        );
        Ok(stats)
    }

    /// Visits every queue once. Returns true if any job was claimed.
    ///
    /// Store errors skip the queue for this sweep; the next sweep retries.
    pub async fn sweep(&self) -> bool {
        let mut claimed_any = false;

        for queue in &self.config.queues {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                // At capacity; the rest of the queues wait for the next sweep
                break;
            };

            match self.claim(queue).await {
                Ok(Some(job_id)) => {
                    self.dispatch(queue.clone(), job_id, permit);
                    claimed_any = true;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        queue = %queue,
                        error = %e,
                        "Sweep failed for queue; retrying next sweep"
                    );
                }
            }
        }

        claimed_any
    }

    async fn claim(&self, queue: &str) -> JobResult<Option<JobId>> {
        if self.manager.is_queue_paused(queue).await? {
            return Ok(None);
        }
        self.manager.claim_next(queue).await
    }

    fn dispatch(&self, queue: String, job_id: JobId, permit: OwnedSemaphorePermit) {
        self.executor.counters.claimed.fetch_add(1, Ordering::Relaxed);
        let executor = self.executor.clone();
        let span = info_span!(
            "job",
            worker_id = %self.config.worker_id,
            job_id = %job_id,
            queue = %queue
        );

        tokio::spawn(
            async move {
                let _permit = permit;
                executor.execute(&queue, &job_id).await;
            }
            .instrument(span),
        );
    }

    async fn drain(&self) -> JobResult<()> {
        let permits = u32::try_from(self.config.concurrency)
            .map_err(|_| JobError::Configuration("concurrency too large".to_string()))?;
        let _all = self
            .semaphore
            .acquire_many(permits)
            .await
            .map_err(|e| JobError::Internal(format!("semaphore closed: {}", e)))?;
        Ok(())
    }

    fn spawn_heartbeat(&self) -> tokio::task::JoinHandle<()> {
        let liveness = self.liveness.clone();
        let semaphore = self.semaphore.clone();
        let worker_id = self.config.worker_id.clone();
        let concurrency = self.config.concurrency;
        let interval = self.config.heartbeat_interval;

        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let active = concurrency - semaphore.available_permits();
                    WorkerMetrics::update_in_flight(&worker_id, active, concurrency);
                    if let Err(e) = liveness
                        .record_heartbeat(&worker_id, concurrency, active)
                        .await
                    {
                        warn!(error = %e, "Heartbeat failed");
                    }
                }
            }
            .instrument(info_span!("heartbeat")),
        )
    }
}
