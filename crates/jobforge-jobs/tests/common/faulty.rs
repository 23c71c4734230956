//! Memory store that fails chosen calls with `StoreUnavailable`.

use async_trait::async_trait;
use jobforge_jobs::store::{Claim, Transaction};
use jobforge_jobs::{JobError, JobResult, MemoryStore, Store};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    claim_failures: Mutex<usize>,
    get_failures: Mutex<HashMap<String, usize>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` claims before they touch the store.
    pub fn fail_claims(&self, n: usize) {
        *self.claim_failures.lock() = n;
    }

    /// Fails the next `n` reads of `key`.
    pub fn fail_gets(&self, key: &str, n: usize) {
        self.get_failures.lock().insert(key.to_string(), n);
    }

    fn take(remaining: &mut usize, what: &str) -> JobResult<()> {
        if *remaining == 0 {
            return Ok(());
        }
        *remaining -= 1;
        Err(JobError::StoreUnavailable(format!("injected {} failure", what)))
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn get(&self, key: &str) -> JobResult<Option<String>> {
        let injected = self
            .get_failures
            .lock()
            .get_mut(key)
            .map_or(Ok(()), |remaining| Self::take(remaining, "get"));
        injected?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> JobResult<()> {
        self.inner.set(key, value).await
    }

    async fn incr(&self, key: &str) -> JobResult<i64> {
        self.inner.incr(key).await
    }

    async fn hget(&self, key: &str, field: &str) -> JobResult<Option<String>> {
        self.inner.hget(key, field).await
    }

    async fn hgetall(&self, key: &str) -> JobResult<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> JobResult<()> {
        self.inner.hset_multiple(key, fields).await
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> JobResult<i64> {
        self.inner.hincr(key, field, delta).await
    }

    async fn lrange_all(&self, key: &str) -> JobResult<Vec<String>> {
        self.inner.lrange_all(key).await
    }

    async fn llen(&self, key: &str) -> JobResult<u64> {
        self.inner.llen(key).await
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> JobResult<()> {
        self.inner.zadd(key, member, score).await
    }

    async fn zpopmin(&self, key: &str) -> JobResult<Option<(String, f64)>> {
        self.inner.zpopmin(key).await
    }

    async fn zrange_all(&self, key: &str) -> JobResult<Vec<String>> {
        self.inner.zrange_all(key).await
    }

    async fn zcard(&self, key: &str) -> JobResult<u64> {
        self.inner.zcard(key).await
    }

    async fn exec(&self, tx: Transaction) -> JobResult<bool> {
        self.inner.exec(tx).await
    }

    async fn claim_lowest(&self, claim: &Claim) -> JobResult<Option<String>> {
        let injected = Self::take(&mut self.claim_failures.lock(), "claim");
        injected?;
        self.inner.claim_lowest(claim).await
    }

    async fn ping(&self) -> JobResult<()> {
        self.inner.ping().await
    }
}
