//! Redis-backed store.

use super::{Claim, Store, Transaction, WriteOp};
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use jobforge_config::RedisConfig;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, info};

/// Guarded transactions are retried this many times when a concurrent
/// writer touches the watched key between the check and `EXEC`.
const MAX_TRANSACTION_ATTEMPTS: usize = 8;

/// Create a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!("Creating Redis connection pool for job queue...");

    let cfg = Config::from_url(&config.url);

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    // Test connection
    let mut conn = pool.get().await?;
    redis::cmd("PING").query_async::<String>(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Store backed by a Redis connection pool.
///
/// Guarded transactions use `WATCH` on the guard list, check membership with
/// `LPOS`, then apply the writes in a `MULTI`/`EXEC` block. `LPOS` needs
/// Redis 6.0.6 or later.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Create a new Redis store.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }
}

/// ZPOPMIN, RPUSH of the member's job id and HSET of the claim fields as
/// one server-side step.
const CLAIM_LOWEST_SCRIPT: &str = r#"
    local popped = redis.call("ZPOPMIN", KEYS[1])
    if #popped == 0 then
        return false
    end
    local id = popped[1]
    local sep = string.find(id, ":", 1, true)
    if sep then
        id = string.sub(id, sep + 1)
    end
    redis.call("RPUSH", KEYS[2], id)
    if #ARGV > 1 then
        local fields = {}
        for i = 2, #ARGV do
            fields[#fields + 1] = ARGV[i]
        end
        redis.call("HSET", ARGV[1] .. id, unpack(fields))
    end
    return id
"#;

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> JobResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: &str) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn incr(&self, key: &str) -> JobResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.incr(key, 1i64).await?)
    }

    async fn hget(&self, key: &str, field: &str) -> JobResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hget(key, field).await?)
    }

    async fn hgetall(&self, key: &str) -> JobResult<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall(key).await?)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(String, String)]) -> JobResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> JobResult<i64> {
        let mut conn = self.conn().await?;
        Ok(conn.hincr(key, field, delta).await?)
    }

    async fn lrange_all(&self, key: &str) -> JobResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange(key, 0, -1).await?)
    }

    async fn llen(&self, key: &str) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.llen(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> JobResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    async fn zpopmin(&self, key: &str) -> JobResult<Option<(String, f64)>> {
        let mut conn = self.conn().await?;
        // ZPOPMIN atomically removes the lowest score, so two workers never
        // receive the same member.
        let popped: Vec<(String, f64)> = conn.zpopmin(key, 1).await?;
        Ok(popped.into_iter().next())
    }

    async fn zrange_all(&self, key: &str) -> JobResult<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.zrange(key, 0, -1).await?)
    }

    async fn zcard(&self, key: &str) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(key).await?)
    }

    async fn exec(&self, tx: Transaction) -> JobResult<bool> {
        if tx.ops.is_empty() {
            return Ok(true);
        }

        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &tx.ops {
            match op {
                // Redis rejects HSET and HDEL without fields
                WriteOp::HSet { fields, .. } if fields.is_empty() => {}
                WriteOp::HDel { fields, .. } if fields.is_empty() => {}
                WriteOp::HSet { key, fields } => {
                    pipe.hset_multiple(key, fields.as_slice()).ignore();
                }
                WriteOp::HDel { key, fields } => {
                    pipe.hdel(key, fields).ignore();
                }
                WriteOp::RPush { key, value } => {
                    pipe.rpush(key, value).ignore();
                }
                WriteOp::LRem { key, value } => {
                    pipe.lrem(key, 0, value).ignore();
                }
                WriteOp::ZAdd { key, member, score } => {
                    pipe.zadd(key, member, *score).ignore();
                }
            }
        }

        let Some(guard) = &tx.guard else {
            let _: () = pipe.query_async(&mut *conn).await?;
            return Ok(true);
        };

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let _: () = redis::cmd("WATCH")
                .arg(&guard.list)
                .query_async(&mut *conn)
                .await?;

            let position: Option<i64> = redis::cmd("LPOS")
                .arg(&guard.list)
                .arg(&guard.value)
                .query_async(&mut *conn)
                .await?;

            if position.is_none() {
                let _: () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
                return Ok(false);
            }

            // EXEC replies nil when the watched key changed after WATCH.
            let applied: Option<()> = pipe.query_async(&mut *conn).await?;
            if applied.is_some() {
                return Ok(true);
            }

            debug!(
                guard_list = %guard.list,
                attempt = attempt,
                "Transaction aborted by concurrent write, retrying"
            );
        }

        Err(JobError::StoreUnavailable(format!(
            "transaction on {} aborted {} times by concurrent writers",
            guard.list, MAX_TRANSACTION_ATTEMPTS
        )))
    }

    async fn claim_lowest(&self, claim: &Claim) -> JobResult<Option<String>> {
        let mut conn = self.conn().await?;

        let script = redis::Script::new(CLAIM_LOWEST_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&claim.zset)
            .key(&claim.list)
            .arg(&claim.record_prefix);
        for (field, value) in &claim.fields {
            invocation.arg(field).arg(value);
        }

        Ok(invocation.invoke_async(&mut *conn).await?)
    }

    async fn ping(&self) -> JobResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok(())
    }
}
