//! Per-queue priority ordering of waiting jobs.
//!
//! Waiting job ids live in a sorted set scored by priority, lowest first.
//! Each member is prefixed with a zero-padded insertion sequence so that
//! equal priorities pop in FIFO order (sorted sets break score ties by
//! member bytes).

use crate::error::JobResult;
use crate::job::JobId;
use crate::store::{Store, StoreKeys, Transaction};
use std::sync::Arc;

/// Priority ordering over the waiting jobs of each queue.
#[derive(Clone)]
pub struct PriorityQueue {
    store: Arc<dyn Store>,
    keys: StoreKeys,
}

impl PriorityQueue {
    /// Create a priority engine over the given store.
    pub fn new(store: Arc<dyn Store>, keys: StoreKeys) -> Self {
        Self { store, keys }
    }

    /// Sorted set member for a job inserted with sequence number `seq`.
    pub fn encode_member(seq: i64, job_id: &JobId) -> String {
        format!("{:020}:{}", seq, job_id)
    }

    /// Extracts the job id from a sorted set member.
    ///
    /// Members without a sequence prefix are taken as bare job ids.
    pub fn decode_member(member: &str) -> JobId {
        match member.split_once(':') {
            Some((seq, id)) if seq.bytes().all(|b| b.is_ascii_digit()) => JobId::from(id),
            _ => JobId::from(member),
        }
    }

    /// Adds an insertion of `job_id` to `tx`.
    ///
    /// Allocates the sequence number eagerly; a sequence that is never
    /// committed only leaves a gap.
    pub async fn stage_insert(
        &self,
        tx: Transaction,
        queue: &str,
        job_id: &JobId,
        priority: i32,
    ) -> JobResult<Transaction> {
        let seq = self.store.incr(&self.keys.sequence(queue)).await?;
        Ok(tx.zadd(
            self.keys.priority_queue(queue),
            Self::encode_member(seq, job_id),
            f64::from(priority),
        ))
    }

    /// Inserts a job id.
    pub async fn insert(&self, queue: &str, job_id: &JobId, priority: i32) -> JobResult<()> {
        let tx = self
            .stage_insert(Transaction::new(), queue, job_id, priority)
            .await?;
        self.store.exec(tx).await?;
        Ok(())
    }

    /// Atomically removes and returns the best job id, if any.
    pub async fn pop_highest(&self, queue: &str) -> JobResult<Option<JobId>> {
        let popped = self.store.zpopmin(&self.keys.priority_queue(queue)).await?;
        Ok(popped.map(|(member, _)| Self::decode_member(&member)))
    }

    /// Waiting job ids in the order they would be served.
    pub async fn ids(&self, queue: &str) -> JobResult<Vec<JobId>> {
        let members = self
            .store
            .zrange_all(&self.keys.priority_queue(queue))
            .await?;
        Ok(members.iter().map(|m| Self::decode_member(m)).collect())
    }

    /// Number of waiting jobs.
    pub async fn len(&self, queue: &str) -> JobResult<u64> {
        self.store.zcard(&self.keys.priority_queue(queue)).await
    }
}
