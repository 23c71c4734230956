//! Jobforge Jobs - Priority Job Queue
//!
//! A Redis-backed job queue with:
//! - Priority ordering (lower score first, FIFO among equal priorities)
//! - An explicit job state machine (waiting, active, completed, failed, dead)
//! - Operator retry, dead-letter and requeue with attempts reset
//! - Per-queue pause flags
//! - A worker scheduler with bounded concurrency and graceful drain
//! - Worker heartbeats and liveness
//! - Queue summaries, latency and success/failure rates
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Jobforge Jobs Architecture                   │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  Producer ──enqueue──▶ QueueManager ◀──retry/requeue── Operator  │
//! │                            │                                     │
//! │                            ▼                                     │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                  Store (Redis or memory)                   │  │
//! │  │  ┌──────────┐ ┌────────┐ ┌───────────┐ ┌────────┐ ┌──────┐ │  │
//! │  │  │ priority │ │ active │ │ completed │ │ failed │ │ dead │ │  │
//! │  │  │  (zset)  │ │ (list) │ │  (list)   │ │ (list) │ │(list)│ │  │
//! │  │  └──────────┘ └────────┘ └───────────┘ └────────┘ └──────┘ │  │
//! │  │  job records (hash)        worker status (hash)            │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! │                            ▲                                     │
//! │                            │ dequeue_next / move_to_*            │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                    WorkerScheduler                         │  │
//! │  │   round-robin sweep ─▶ semaphore slot ─▶ job task          │  │
//! │  │                                   │                        │  │
//! │  │                        ProcessorRegistry (type → fn)       │  │
//! │  │   heartbeat task ─▶ LivenessRegistry                       │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use jobforge_jobs::prelude::*;
//! use futures::FutureExt;
//! use std::sync::Arc;
//!
//! let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
//! let manager = Arc::new(QueueManager::new(store.clone(), "jobforge"));
//! let liveness = Arc::new(LivenessRegistry::new(store, "jobforge"));
//!
//! manager.enqueue("email", "welcome", serde_json::json!({"to": "a@b.c"}), 1).await?;
//!
//! let processors =
//!     ProcessorRegistry::with_default_fn(|_| async { Ok(serde_json::Value::Null) }.boxed());
//! let config = WorkerSchedulerConfig::default();
//! let scheduler = WorkerScheduler::new(manager, liveness, processors, config);
//! let handle = scheduler.handle();
//! tokio::spawn(async move { tokio::signal::ctrl_c().await.ok(); handle.shutdown(); });
//! scheduler.run().await?;
//! ```

pub mod clock;
pub mod di;
pub mod error;
pub mod escalation;
pub mod job;
pub mod liveness;
pub mod manager;
pub mod metrics;
pub mod priority;
pub mod processor;
pub mod status;
pub mod store;
pub mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use di::{QueueService, QueueServiceInterface};
pub use error::{JobError, JobResult};
pub use escalation::EscalationPolicy;
pub use job::{JobId, JobRecord, JobState};
pub use liveness::{
    LivenessRegistry, WorkerStatus, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_TIMEOUT,
};
pub use manager::{NewJob, QueueManager};
pub use metrics::{register_metrics, JobMetrics, WorkerMetrics};
pub use priority::PriorityQueue;
pub use processor::{
    Processor, ProcessorError, ProcessorRegistry, ProcessorResult, DEFAULT_PROCESSOR,
};
pub use status::{LatencyStats, QueueMetrics, QueueSummary, SystemMetrics};
pub use store::{create_pool, MemoryStore, RedisStore, Store, StoreKeys};
pub use worker::{WorkerHandle, WorkerScheduler, WorkerSchedulerConfig, WorkerStats};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::job::{JobId, JobRecord, JobState};
    pub use crate::liveness::LivenessRegistry;
    pub use crate::manager::{NewJob, QueueManager};
    pub use crate::processor::{Processor, ProcessorError, ProcessorRegistry, ProcessorResult};
    pub use crate::store::{MemoryStore, Store};
    pub use crate::worker::{WorkerScheduler, WorkerSchedulerConfig};
    pub use crate::{JobError, JobResult};
}
