//! When a failed job is moved to the dead-letter list automatically.

use jobforge_config::WorkerConfig;
use serde::{Deserialize, Serialize};

/// Automatic dead-letter escalation.
///
/// Disabled by default: failed jobs stay in the failed list until an
/// operator retries or dead-letters them. The threshold is compared with the
/// record's failure count, which operator retries keep and a dead-letter
/// requeue resets. A job that keeps failing across retries is therefore
/// parked after `max_attempts` failures in total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Dead-letter once the failure count reaches this value.
    pub max_attempts: Option<u32>,
}

impl EscalationPolicy {
    /// Never escalate.
    pub const fn never() -> Self {
        Self { max_attempts: None }
    }

    /// Escalate once the failure count reaches `max_attempts`.
    pub const fn after_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    /// Returns true if a job that has failed `failures` times should be
    /// dead-lettered.
    pub fn should_escalate(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

impl From<&WorkerConfig> for EscalationPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
        }
    }
}
