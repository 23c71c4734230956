//! Configuration validation module.
//!
//! Collects every problem in one pass so a misconfigured worker reports all
//! of them at startup instead of one per restart.

use crate::{AppConfig, RedisConfig, WorkerConfig};
use jobforge_core::LoggingConfig;
use std::collections::HashSet;
use std::fmt;
use url::Url;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// URL format is invalid.
    InvalidUrl { url_type: String, message: String },
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: usize, maximum: usize },
    /// Value must be greater than zero.
    NonPositive { name: String },
    /// Liveness timeout must exceed the heartbeat interval.
    HeartbeatTimeoutTooShort { interval_secs: u64, timeout_secs: u64 },
    /// Worker listens on no queues.
    NoQueues,
    /// Queue name is empty or contains a key separator.
    InvalidQueueName { name: String },
    /// Queue listed more than once.
    DuplicateQueue { name: String },
    /// Key prefix is empty.
    EmptyKeyPrefix,
    /// Log level is invalid.
    InvalidLogLevel { value: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(f, "Pool size {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::NonPositive { name } => {
                write!(f, "'{}' must be greater than zero", name)
            }
            Self::HeartbeatTimeoutTooShort {
                interval_secs,
                timeout_secs,
            } => {
                write!(
                    f,
                    "Heartbeat timeout ({}s) must be greater than heartbeat interval ({}s)",
                    timeout_secs, interval_secs
                )
            }
            Self::NoQueues => write!(f, "Worker must listen on at least one queue"),
            Self::InvalidQueueName { name } => {
                write!(f, "Invalid queue name: '{}' (must be non-empty, without ':')", name)
            }
            Self::DuplicateQueue { name } => write!(f, "Queue '{}' is listed more than once", name),
            Self::EmptyKeyPrefix => write!(f, "Redis key prefix cannot be empty"),
            Self::InvalidLogLevel { value } => {
                write!(
                    f,
                    "Invalid log level: '{}' (valid: trace, debug, info, warn, error)",
                    value
                )
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Result of configuration validation containing all errors found.
#[derive(Debug)]
pub struct ValidationResult {
    errors: Vec<ConfigValidationError>,
}

impl ValidationResult {
    fn new() -> Self {
        Self { errors: Vec::new() }
    }

    fn add_error(&mut self, error: ConfigValidationError) {
        self.errors.push(error);
    }

    /// Converts to Result, returning Err with all errors if any exist.
    pub fn into_result(self) -> Result<(), Vec<ConfigValidationError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: usize = 1000;
    /// Valid log levels.
    const VALID_LOG_LEVELS: &'static [&'static str] = &["trace", "debug", "info", "warn", "error"];

    /// Validates the entire application configuration.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut result = ValidationResult::new();

        Self::validate_redis(&config.redis, &mut result);
        Self::validate_worker(&config.worker, &mut result);
        Self::validate_logging(&config.logging, &mut result);

        result.into_result()
    }

    fn validate_redis(config: &RedisConfig, result: &mut ValidationResult) {
        match Url::parse(&config.url) {
            Ok(url) if url.scheme() == "redis" || url.scheme() == "rediss" => {}
            Ok(_) => result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL must start with redis:// or rediss://".to_string(),
            }),
            Err(e) => result.add_error(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: e.to_string(),
            }),
        }

        if config.pool_size == 0 {
            result.add_error(ConfigValidationError::NonPositive {
                name: "redis.pool_size".to_string(),
            });
        }
        if config.pool_size > Self::MAX_POOL_SIZE {
            result.add_error(ConfigValidationError::PoolSizeTooLarge {
                value: config.pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }

        if config.key_prefix.trim().is_empty() {
            result.add_error(ConfigValidationError::EmptyKeyPrefix);
        }
    }

    fn validate_worker(config: &WorkerConfig, result: &mut ValidationResult) {
        if config.queues.is_empty() {
            result.add_error(ConfigValidationError::NoQueues);
        }

        let mut seen = HashSet::new();
        for name in &config.queues {
            if name.trim().is_empty() || name.contains(':') {
                result.add_error(ConfigValidationError::InvalidQueueName { name: name.clone() });
            } else if !seen.insert(name.as_str()) {
                result.add_error(ConfigValidationError::DuplicateQueue { name: name.clone() });
            }
        }

        if config.concurrency == 0 {
            result.add_error(ConfigValidationError::NonPositive {
                name: "worker.concurrency".to_string(),
            });
        }
        if config.heartbeat_interval_secs == 0 {
            result.add_error(ConfigValidationError::NonPositive {
                name: "worker.heartbeat_interval_secs".to_string(),
            });
        }
        if config.heartbeat_timeout_secs <= config.heartbeat_interval_secs {
            result.add_error(ConfigValidationError::HeartbeatTimeoutTooShort {
                interval_secs: config.heartbeat_interval_secs,
                timeout_secs: config.heartbeat_timeout_secs,
            });
        }
        if config.idle_backoff_ms == 0 {
            result.add_error(ConfigValidationError::NonPositive {
                name: "worker.idle_backoff_ms".to_string(),
            });
        }
        if config.job_timeout_secs == Some(0) {
            result.add_error(ConfigValidationError::NonPositive {
                name: "worker.job_timeout_secs".to_string(),
            });
        }
        if config.max_attempts == Some(0) {
            result.add_error(ConfigValidationError::NonPositive {
                name: "worker.max_attempts".to_string(),
            });
        }
    }

    fn validate_logging(config: &LoggingConfig, result: &mut ValidationResult) {
        let level = config.level.to_lowercase();
        if !Self::VALID_LOG_LEVELS.contains(&level.as_str()) {
            result.add_error(ConfigValidationError::InvalidLogLevel {
                value: config.level.clone(),
            });
        }
    }
}
