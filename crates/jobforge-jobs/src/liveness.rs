//! Worker liveness registry.
//!
//! Workers publish a heartbeat into a shared hash; anyone can list the
//! workers and judge liveness against a fixed timeout. Liveness is
//! observational only: nothing here reclaims jobs left active by a dead
//! worker.

use crate::clock::{Clock, SystemClock};
use crate::error::JobResult;
use crate::store::{Store, StoreKeys};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default heartbeat emission interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default liveness timeout (tolerates two missed beats).
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(15);

/// Heartbeat as stored in the worker status hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Heartbeat {
    /// Epoch milliseconds.
    last_heartbeat: i64,
    concurrency: usize,
    active_jobs: usize,
}

/// Reported status of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatus {
    /// Worker ID.
    pub id: String,
    /// Last heartbeat timestamp.
    pub last_heartbeat: DateTime<Utc>,
    /// Maximum concurrent jobs.
    pub concurrency: usize,
    /// Jobs executing at the last heartbeat.
    pub active_jobs: usize,
    /// Whether the last heartbeat is within the timeout.
    pub alive: bool,
}

/// Liveness registry backed by the shared store.
#[derive(Clone)]
pub struct LivenessRegistry {
    store: Arc<dyn Store>,
    keys: StoreKeys,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl LivenessRegistry {
    /// Create a registry with the default timeout and the system clock.
    pub fn new(store: Arc<dyn Store>, key_prefix: impl Into<String>) -> Self {
        Self::with_clock(
            store,
            key_prefix,
            DEFAULT_HEARTBEAT_TIMEOUT,
            Arc::new(SystemClock),
        )
    }

    /// Create a registry with an explicit timeout and clock.
    pub fn with_clock(
        store: Arc<dyn Store>,
        key_prefix: impl Into<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            keys: StoreKeys::new(key_prefix),
            timeout,
            clock,
        }
    }

    /// Liveness timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upserts the status of `worker_id` with the current time.
    pub async fn record_heartbeat(
        &self,
        worker_id: &str,
        concurrency: usize,
        active_jobs: usize,
    ) -> JobResult<()> {
        let heartbeat = Heartbeat {
            last_heartbeat: self.clock.now().timestamp_millis(),
            concurrency,
            active_jobs,
        };
        let value = serde_json::to_string(&heartbeat)?;
        self.store
            .hset_multiple(
                &self.keys.worker_status(),
                &[(worker_id.to_string(), value)],
            )
            .await?;

        debug!(
            worker_id = %worker_id,
            active_jobs = active_jobs,
            "Worker heartbeat recorded"
        );
        Ok(())
    }

    /// Every worker that ever reported, sorted by id.
    ///
    /// Entries that cannot be decoded are skipped.
    pub async fn list_workers(&self) -> JobResult<Vec<WorkerStatus>> {
        let entries = self.store.hgetall(&self.keys.worker_status()).await?;
        let now = self.clock.now();

        let mut workers: Vec<WorkerStatus> = entries
            .into_iter()
            .filter_map(|(id, raw)| self.decode(id, &raw, now))
            .collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }

    /// Status of one worker, if it ever reported.
    pub async fn get_worker(&self, worker_id: &str) -> JobResult<Option<WorkerStatus>> {
        let raw = self
            .store
            .hget(&self.keys.worker_status(), worker_id)
            .await?;
        let now = self.clock.now();
        Ok(raw.and_then(|raw| self.decode(worker_id.to_string(), &raw, now)))
    }

    /// Returns true if a heartbeat at `last_heartbeat` is still fresh at `now`.
    pub fn is_alive(&self, last_heartbeat: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - last_heartbeat).to_std() {
            Ok(elapsed) => elapsed < self.timeout,
            // Heartbeat from the future (clock skew between hosts)
            Err(_) => true,
        }
    }

    fn decode(&self, id: String, raw: &str, now: DateTime<Utc>) -> Option<WorkerStatus> {
        let heartbeat: Heartbeat = match serde_json::from_str(raw) {
            Ok(hb) => hb,
            Err(e) => {
                warn!(worker_id = %id, error = %e, "Skipping unreadable worker status");
                return None;
            }
        };
        let Some(last_heartbeat) = DateTime::from_timestamp_millis(heartbeat.last_heartbeat) else {
            warn!(worker_id = %id, "Skipping worker status with invalid timestamp");
            return None;
        };

        Some(WorkerStatus {
            alive: self.is_alive(last_heartbeat, now),
            id,
            last_heartbeat,
            concurrency: heartbeat.concurrency,
            active_jobs: heartbeat.active_jobs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn registry() -> (LivenessRegistry, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryStore::new());
        let registry = LivenessRegistry::with_clock(
            store.clone(),
            "test",
            DEFAULT_HEARTBEAT_TIMEOUT,
            clock.clone(),
        );
        (registry, clock, store)
    }

    #[tokio::test]
    async fn test_worker_dead_after_timeout() {
        let (registry, clock, _) = registry();
        registry.record_heartbeat("worker-1", 2, 1).await.unwrap();

        let workers = registry.list_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert!(workers[0].alive);
        assert_eq!(workers[0].active_jobs, 1);

        clock.advance(chrono::Duration::seconds(16));
        let workers = registry.list_workers().await.unwrap();
        assert!(!workers[0].alive);
    }

    #[tokio::test]
    async fn test_timeout_boundary_is_exclusive() {
        let (registry, clock, _) = registry();
        registry.record_heartbeat("worker-1", 2, 0).await.unwrap();

        clock.advance(chrono::Duration::milliseconds(14_999));
        assert!(registry.get_worker("worker-1").await.unwrap().unwrap().alive);

        clock.advance(chrono::Duration::milliseconds(1));
        assert!(!registry.get_worker("worker-1").await.unwrap().unwrap().alive);
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_liveness() {
        let (registry, clock, _) = registry();
        registry.record_heartbeat("worker-1", 2, 0).await.unwrap();
        clock.advance(chrono::Duration::seconds(10));
        registry.record_heartbeat("worker-1", 2, 2).await.unwrap();
        clock.advance(chrono::Duration::seconds(10));

        let status = registry.get_worker("worker-1").await.unwrap().unwrap();
        assert!(status.alive);
        assert_eq!(status.active_jobs, 2);
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_skipped() {
        let (registry, _, store) = registry();
        registry.record_heartbeat("b-worker", 1, 0).await.unwrap();
        store
            .hset_multiple(
                "test:worker:status",
                &[("a-worker".to_string(), "not json".to_string())],
            )
            .await
            .unwrap();

        let workers = registry.list_workers().await.unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].id, "b-worker");
    }

    #[tokio::test]
    async fn test_unknown_worker() {
        let (registry, _, _) = registry();
        assert!(registry.get_worker("nobody").await.unwrap().is_none());
    }
}
