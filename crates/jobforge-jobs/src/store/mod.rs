//! Shared key-value store backing every queue.
//!
//! The queue state lives in a Redis-like store: strings, hashes, lists and
//! sorted sets addressed by key. [`Store`] exposes the handful of primitives
//! the queue needs plus [`Store::exec`], which applies a batch of writes
//! atomically under an optional membership guard. Every multi-key state
//! transition goes through `exec` so no reader observes a job in two
//! collections, or in none.

mod keys;
mod memory;
mod redis;

pub use self::keys::StoreKeys;
pub use self::memory::MemoryStore;
pub use self::redis::{create_pool, RedisStore};

use crate::error::JobResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// Store primitives used by the queue.
#[async_trait]
pub trait Store: Send + Sync {
    /// Reads a string value.
    async fn get(&self, key: &str) -> JobResult<Option<String>>;

    /// Writes a string value.
    async fn set(&self, key: &str, value: &str) -> JobResult<()>;

    /// Atomically increments an integer value and returns the new value.
    async fn incr(&self, key: &str) -> JobResult<i64>;

    /// Reads one hash field.
    async fn hget(&self, key: &str, field: &str) -> JobResult<Option<String>>;

    /// Reads a whole hash. A missing key yields an empty map.
    async fn hgetall(&self, key: &str) -> JobResult<HashMap<String, String>>;

    /// Writes several hash fields.
    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> JobResult<()>;

    /// Atomically increments an integer hash field and returns the new value.
    async fn hincr(&self, key: &str, field: &str, delta: i64) -> JobResult<i64>;

    /// Reads a whole list in order.
    async fn lrange_all(&self, key: &str) -> JobResult<Vec<String>>;

    /// Returns the length of a list.
    async fn llen(&self, key: &str) -> JobResult<u64>;

    /// Adds a member to a sorted set, or updates its score.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> JobResult<()>;

    /// Atomically removes and returns the member with the lowest score.
    ///
    /// Ties are broken by member in byte order.
    async fn zpopmin(&self, key: &str) -> JobResult<Option<(String, f64)>>;

    /// Reads all members of a sorted set, lowest score first.
    async fn zrange_all(&self, key: &str) -> JobResult<Vec<String>>;

    /// Returns the number of members of a sorted set.
    async fn zcard(&self, key: &str) -> JobResult<u64>;

    /// Applies a transaction.
    ///
    /// Returns `false` without writing anything if the guard does not hold.
    async fn exec(&self, tx: Transaction) -> JobResult<bool>;

    /// Pops the lowest member of `claim.zset` and, in the same atomic step,
    /// appends the job id it carries to `claim.list` and writes
    /// `claim.fields` to that job's record.
    ///
    /// The job id is the part of the member after its first `:`, or the
    /// whole member if it has none. Returns the job id, or `None` if the
    /// set is empty.
    async fn claim_lowest(&self, claim: &Claim) -> JobResult<Option<String>>;

    /// Checks the store is reachable.
    async fn ping(&self) -> JobResult<()>;
}

/// Precondition checked atomically with a transaction's writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    /// List that must contain `value`.
    pub list: String,
    /// Element looked up in `list`.
    pub value: String,
}

impl Guard {
    /// Requires `value` to be an element of the list at `list`.
    pub fn list_contains(list: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            list: list.into(),
            value: value.into(),
        }
    }
}

/// Atomic pop-and-claim of the best sorted set member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Sorted set popped from.
    pub zset: String,
    /// List the claimed job id is appended to.
    pub list: String,
    /// Record key prefix; the job id completes the key.
    pub record_prefix: String,
    /// Record fields written on claim.
    pub fields: Vec<(String, String)>,
}

impl Claim {
    /// Job id carried by a sorted set member.
    pub fn member_id(member: &str) -> &str {
        member.split_once(':').map_or(member, |(_, id)| id)
    }

    /// Record key of `job_id`.
    pub fn record_key(&self, job_id: &str) -> String {
        format!("{}{}", self.record_prefix, job_id)
    }
}

/// A single write inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Set hash fields.
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Remove hash fields.
    HDel { key: String, fields: Vec<String> },
    /// Append to a list.
    RPush { key: String, value: String },
    /// Remove every occurrence of `value` from a list.
    LRem { key: String, value: String },
    /// Add a sorted set member.
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
}

/// A batch of writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    /// Optional precondition.
    pub guard: Option<Guard>,
    /// Writes, applied in order.
    pub ops: Vec<WriteOp>,
}

impl Transaction {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the transaction conditional.
    #[must_use]
    pub fn guard(mut self, guard: Guard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Sets hash fields.
    #[must_use]
    pub fn hset(mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        self.ops.push(WriteOp::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    /// Removes hash fields.
    #[must_use]
    pub fn hdel(mut self, key: impl Into<String>, fields: &[&str]) -> Self {
        self.ops.push(WriteOp::HDel {
            key: key.into(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        });
        self
    }

    /// Appends to a list.
    #[must_use]
    pub fn rpush(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(WriteOp::RPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Removes all occurrences of a list element.
    #[must_use]
    pub fn lrem(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(WriteOp::LRem {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a sorted set member.
    #[must_use]
    pub fn zadd(mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.ops.push(WriteOp::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_builder() {
        let tx = Transaction::new()
            .guard(Guard::list_contains("failed", "job-1"))
            .lrem("failed", "job-1")
            .zadd("pq", "0001:job-1", 2.0)
            .hdel("job:job-1", &["error"]);

        assert_eq!(tx.guard, Some(Guard::list_contains("failed", "job-1")));
        assert_eq!(tx.ops.len(), 3);
        assert_eq!(
            tx.ops[2],
            WriteOp::HDel {
                key: "job:job-1".to_string(),
                fields: vec!["error".to_string()],
            }
        );
    }

    #[test]
    fn test_claim_member_id() {
        assert_eq!(Claim::member_id("00000000000000000007:job-1"), "job-1");
        assert_eq!(Claim::member_id("job-1"), "job-1");

        let claim = Claim {
            zset: "pq".to_string(),
            list: "active".to_string(),
            record_prefix: "p:job:".to_string(),
            fields: Vec::new(),
        };
        assert_eq!(claim.record_key("job-1"), "p:job:job-1");
    }
}
