//! Application configuration structures.

use jobforge_core::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queues a worker listens on when none are configured.
pub const DEFAULT_QUEUES: &[&str] = &["default", "email", "image", "report"];

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Shared store (Redis) configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Worker process configuration.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "jobforge".to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Key prefix for every job queue key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_pool_size() -> usize {
    10
}

fn default_key_prefix() -> String {
    "jobforge".to_string()
}

/// Worker process configuration.
///
/// Read once at worker startup; nothing here changes at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker identifier. Defaults to `{hostname}-{pid}` when unset.
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Queues swept in round-robin order.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,

    /// Maximum number of jobs executing at once in this worker.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Heartbeat emission interval in seconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Seconds without a heartbeat before a worker is reported dead.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Sleep between sweeps that found no work, in milliseconds.
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: u64,

    /// Optional per-job execution timeout in seconds.
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    /// Dead-letter a failed job once its recorded failures reach this value.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            queues: default_queues(),
            concurrency: default_concurrency(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            idle_backoff_ms: default_idle_backoff(),
            job_timeout_secs: None,
            max_attempts: None,
        }
    }
}

fn default_queues() -> Vec<String> {
    DEFAULT_QUEUES.iter().map(|q| (*q).to_string()).collect()
}

fn default_concurrency() -> usize {
    2
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    15
}

fn default_idle_backoff() -> u64 {
    1000
}

impl WorkerConfig {
    /// Returns the heartbeat interval as Duration.
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Returns the liveness timeout as Duration.
    pub const fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Returns the idle back-off as Duration.
    pub const fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Returns the job timeout, if one is configured.
    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.map(Duration::from_secs)
    }
}
