//! Shared harness for queue integration tests.
//!
//! Everything runs against the in-memory store with a manual clock, so the
//! tests need no Redis and never sleep for timestamps.

#![allow(dead_code)]

mod faulty;

pub use faulty::FaultyStore;

use chrono::{TimeZone, Utc};
use jobforge_jobs::{
    JobId, JobRecord, JobState, LivenessRegistry, ManualClock, MemoryStore, QueueManager, Store,
    DEFAULT_HEARTBEAT_TIMEOUT,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const PREFIX: &str = "itest";

const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Queue manager, liveness registry and clock over one memory store.
pub struct TestQueue {
    pub store: Arc<dyn Store>,
    pub clock: Arc<ManualClock>,
    pub manager: Arc<QueueManager>,
    pub liveness: Arc<LivenessRegistry>,
}

impl TestQueue {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let manager = Arc::new(QueueManager::with_clock(
            store.clone(),
            PREFIX,
            clock.clone(),
        ));
        let liveness = Arc::new(LivenessRegistry::with_clock(
            store.clone(),
            PREFIX,
            DEFAULT_HEARTBEAT_TIMEOUT,
            clock.clone(),
        ));
        Self {
            store,
            clock,
            manager,
            liveness,
        }
    }

    /// Claims and activates the next job of `queue`.
    pub async fn claim(&self, queue: &str) -> JobId {
        let id = self
            .manager
            .dequeue_next(queue)
            .await
            .expect("dequeue failed")
            .expect("queue is empty");
        self.manager
            .move_to_active(queue, &id)
            .await
            .expect("move_to_active failed");
        id
    }

    /// Claims the next job of `queue` and fails it with `error`.
    pub async fn claim_and_fail(&self, queue: &str, error: &str) -> JobId {
        let id = self.claim(queue).await;
        self.manager.record_attempt(&id).await.expect("record_attempt failed");
        self.manager
            .move_to_failed(queue, &id, error)
            .await
            .expect("move_to_failed failed");
        id
    }

    /// Every id in `queues` with the collection it sits in.
    ///
    /// Panics if an id sits in more than one per-queue collection, or if its
    /// record's state disagrees with that collection.
    pub async fn assert_single_membership(&self, queues: &[&str]) -> HashMap<JobId, JobState> {
        let mut seen: HashMap<JobId, JobState> = HashMap::new();

        for queue in queues {
            for state in [
                JobState::Waiting,
                JobState::Active,
                JobState::Completed,
                JobState::Failed,
            ] {
                for id in self.manager.job_ids(queue, state).await.unwrap() {
                    if let Some(previous) = seen.insert(id.clone(), state) {
                        panic!("job {} is both {} and {}", id, previous, state);
                    }
                }
            }
        }
        for id in self.manager.dead_letter_ids().await.unwrap() {
            if let Some(previous) = seen.insert(id.clone(), JobState::Dead) {
                panic!("job {} is both {} and dead", id, previous);
            }
        }

        let failed_index = self.manager.failed_job_ids().await.unwrap();
        for (id, state) in &seen {
            assert_eq!(
                failed_index.contains(id),
                *state == JobState::Failed,
                "failed index out of step for job {}",
                id
            );
            let record = self.manager.get_job_by_id(id).await.unwrap().unwrap();
            assert_eq!(record.state, *state, "record state of job {}", id);
        }

        seen
    }

    /// Polls until the record of `job_id` reaches `state`.
    pub async fn wait_for_state(&self, job_id: &JobId, state: JobState) -> JobRecord {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            if let Ok(Some(record)) = self.manager.get_job_by_id(job_id).await {
                if record.state == state {
                    return record;
                }
            }
            assert!(
                Instant::now() < deadline,
                "job {} never reached {}",
                job_id,
                state
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Polls until `queue` holds exactly `count` jobs in `state`.
    pub async fn wait_for_count(&self, queue: &str, state: JobState, count: usize) {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            let ids = self.manager.job_ids(queue, state).await.unwrap();
            if ids.len() == count {
                return;
            }
            assert!(
                Instant::now() < deadline,
                "{} holds {} {} jobs, expected {}",
                queue,
                ids.len(),
                state,
                count
            );
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
