//! In-process store.
//!
//! Mirrors the Redis semantics the queue relies on behind a single mutex, so
//! every call (and every transaction) is atomic with respect to the others.
//! Used by tests and by single-process deployments.

use super::{Claim, Store, Transaction, WriteOp};
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Sorted set score with a total order.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn add(&mut self, member: &str, score: f64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&(Score(old), member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
    }

    fn pop_min(&mut self) -> Option<(String, f64)> {
        let (score, member) = self.ordered.pop_first()?;
        self.scores.remove(&member);
        Some((member, score.0))
    }
}

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, Vec<String>>,
    zsets: HashMap<String, SortedSet>,
}

impl Inner {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::HSet { key, fields } => {
                self.hashes.entry(key).or_default().extend(fields);
            }
            WriteOp::HDel { key, fields } => {
                if let Some(hash) = self.hashes.get_mut(&key) {
                    for field in &fields {
                        hash.remove(field);
                    }
                    if hash.is_empty() {
                        self.hashes.remove(&key);
                    }
                }
            }
            WriteOp::RPush { key, value } => {
                self.lists.entry(key).or_default().push(value);
            }
            WriteOp::LRem { key, value } => {
                if let Some(list) = self.lists.get_mut(&key) {
                    list.retain(|v| *v != value);
                    if list.is_empty() {
                        self.lists.remove(&key);
                    }
                }
            }
            WriteOp::ZAdd { key, member, score } => {
                self.zsets.entry(key).or_default().add(&member, score);
            }
        }
    }
}

/// Store held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> JobResult<Option<String>> {
        Ok(self.inner.lock().strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> JobResult<()> {
        self.inner
            .lock()
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn incr(&self, key: &str) -> JobResult<i64> {
        let mut inner = self.inner.lock();
        let entry = inner.strings.entry(key.to_string()).or_insert_with(|| "0".to_string());
        let next = entry
            .parse::<i64>()
            .map_err(|_| JobError::Internal(format!("value at {} is not an integer", key)))?
            + 1;
        *entry = next.to_string();
        Ok(next)
    }

    async fn hget(&self, key: &str, field: &str) -> JobResult<Option<String>> {
        Ok(self
            .inner
            .lock()
            .hashes
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hgetall(&self, key: &str) -> JobResult<HashMap<String, String>> {
        Ok(self.inner.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> JobResult<()> {
        self.inner.lock().apply(WriteOp::HSet {
            key: key.to_string(),
            fields: fields.to_vec(),
        });
        Ok(())
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> JobResult<i64> {
        let mut inner = self.inner.lock();
        let entry = inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());
        let next = entry.parse::<i64>().map_err(|_| {
            JobError::Internal(format!("field {} of {} is not an integer", field, key))
        })? + delta;
        *entry = next.to_string();
        Ok(next)
    }

    async fn lrange_all(&self, key: &str) -> JobResult<Vec<String>> {
        Ok(self.inner.lock().lists.get(key).cloned().unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> JobResult<u64> {
        Ok(self.inner.lock().lists.get(key).map_or(0, |l| l.len() as u64))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> JobResult<()> {
        self.inner
            .lock()
            .zsets
            .entry(key.to_string())
            .or_default()
            .add(member, score);
        Ok(())
    }

    async fn zpopmin(&self, key: &str) -> JobResult<Option<(String, f64)>> {
        Ok(self.inner.lock().zsets.get_mut(key).and_then(SortedSet::pop_min))
    }

    async fn zrange_all(&self, key: &str) -> JobResult<Vec<String>> {
        Ok(self.inner.lock().zsets.get(key).map_or_else(Vec::new, |z| {
            z.ordered.iter().map(|(_, member)| member.clone()).collect()
        }))
    }

    async fn zcard(&self, key: &str) -> JobResult<u64> {
        Ok(self.inner.lock().zsets.get(key).map_or(0, |z| z.scores.len() as u64))
    }

    async fn exec(&self, tx: Transaction) -> JobResult<bool> {
        let mut inner = self.inner.lock();

        if let Some(guard) = &tx.guard {
            let holds = inner
                .lists
                .get(&guard.list)
                .is_some_and(|list| list.contains(&guard.value));
            if !holds {
                return Ok(false);
            }
        }

        for op in tx.ops {
            inner.apply(op);
        }
        Ok(true)
    }

    async fn claim_lowest(&self, claim: &Claim) -> JobResult<Option<String>> {
        let mut inner = self.inner.lock();

        let Some((member, _)) = inner.zsets.get_mut(&claim.zset).and_then(SortedSet::pop_min)
        else {
            return Ok(None);
        };
        let job_id = Claim::member_id(&member).to_string();

        inner.apply(WriteOp::RPush {
            key: claim.list.clone(),
            value: job_id.clone(),
        });
        if !claim.fields.is_empty() {
            inner.apply(WriteOp::HSet {
                key: claim.record_key(&job_id),
                fields: claim.fields.clone(),
            });
        }
        Ok(Some(job_id))
    }

    async fn ping(&self) -> JobResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Guard;

    #[tokio::test]
    async fn test_zpopmin_orders_by_score_then_member() {
        let store = MemoryStore::new();
        store.zadd("z", "b", 1.0).await.unwrap();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "c", -5.0).await.unwrap();

        assert_eq!(store.zrange_all("z").await.unwrap(), vec!["c", "a", "b"]);
        assert_eq!(store.zpopmin("z").await.unwrap(), Some(("c".to_string(), -5.0)));
        assert_eq!(store.zpopmin("z").await.unwrap(), Some(("a".to_string(), 1.0)));
        assert_eq!(store.zcard("z").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zadd_updates_score() {
        let store = MemoryStore::new();
        store.zadd("z", "a", 1.0).await.unwrap();
        store.zadd("z", "b", 2.0).await.unwrap();
        store.zadd("z", "a", 3.0).await.unwrap();

        assert_eq!(store.zcard("z").await.unwrap(), 2);
        assert_eq!(store.zrange_all("z").await.unwrap(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_zpopmin_empty() {
        let store = MemoryStore::new();
        assert!(store.zpopmin("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_counters() {
        let store = MemoryStore::new();
        assert_eq!(store.incr("seq").await.unwrap(), 1);
        assert_eq!(store.incr("seq").await.unwrap(), 2);
        assert_eq!(store.hincr("h", "attempts", 1).await.unwrap(), 1);
        assert_eq!(store.hincr("h", "attempts", 1).await.unwrap(), 2);
        assert_eq!(store.hget("h", "attempts").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_guarded_transaction() {
        let store = MemoryStore::new();
        let tx = Transaction::new()
            .guard(Guard::list_contains("failed", "job-1"))
            .lrem("failed", "job-1")
            .rpush("dead", "job-1");

        assert!(!store.exec(tx.clone()).await.unwrap());
        assert_eq!(store.llen("dead").await.unwrap(), 0);

        store.exec(Transaction::new().rpush("failed", "job-1")).await.unwrap();
        assert!(store.exec(tx.clone()).await.unwrap());
        assert_eq!(store.lrange_all("dead").await.unwrap(), vec!["job-1"]);
        assert_eq!(store.llen("failed").await.unwrap(), 0);

        // Guard no longer holds
        assert!(!store.exec(tx).await.unwrap());
        assert_eq!(store.llen("dead").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claim_lowest_moves_id_and_marks_record() {
        let store = MemoryStore::new();
        store.zadd("pq", "00000000000000000002:job-b", 1.0).await.unwrap();
        store.zadd("pq", "00000000000000000001:job-a", 1.0).await.unwrap();

        let claim = Claim {
            zset: "pq".to_string(),
            list: "active".to_string(),
            record_prefix: "job:".to_string(),
            fields: vec![("state".to_string(), "active".to_string())],
        };

        assert_eq!(store.claim_lowest(&claim).await.unwrap().as_deref(), Some("job-a"));
        assert_eq!(store.lrange_all("active").await.unwrap(), vec!["job-a"]);
        assert_eq!(store.hget("job:job-a", "state").await.unwrap().as_deref(), Some("active"));
        assert_eq!(store.zcard("pq").await.unwrap(), 1);

        store.claim_lowest(&claim).await.unwrap();
        assert!(store.claim_lowest(&claim).await.unwrap().is_none());
        assert_eq!(store.llen("active").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_hdel_removes_fields() {
        let store = MemoryStore::new();
        store
            .hset_multiple(
                "job",
                &[
                    ("state".to_string(), "failed".to_string()),
                    ("error".to_string(), "boom".to_string()),
                ],
            )
            .await
            .unwrap();
        store
            .exec(Transaction::new().hdel("job", &["error"]))
            .await
            .unwrap();

        let hash = store.hgetall("job").await.unwrap();
        assert_eq!(hash.len(), 1);
        assert_eq!(hash["state"], "failed");
    }
}
