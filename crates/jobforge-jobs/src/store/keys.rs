//! Key layout of the shared store.

/// Key builder for queue state.
#[derive(Debug, Clone)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Waiting jobs of a queue (sorted set, score = priority).
    pub fn priority_queue(&self, queue: &str) -> String {
        format!("{}:queue:{}:priority", self.prefix, queue)
    }

    /// Insertion counter used to keep equal priorities in FIFO order.
    pub fn sequence(&self, queue: &str) -> String {
        format!("{}:queue:{}:seq", self.prefix, queue)
    }

    /// Active job ids of a queue (list).
    pub fn active(&self, queue: &str) -> String {
        format!("{}:queue:{}:active", self.prefix, queue)
    }

    /// Completed job ids of a queue (list).
    pub fn completed(&self, queue: &str) -> String {
        format!("{}:queue:{}:completed", self.prefix, queue)
    }

    /// Failed job ids of a queue (list).
    pub fn failed(&self, queue: &str) -> String {
        format!("{}:queue:{}:failed", self.prefix, queue)
    }

    /// Pause flag of a queue ("1" or "0").
    pub fn paused(&self, queue: &str) -> String {
        format!("{}:queue:{}:paused", self.prefix, queue)
    }

    /// Failed job ids across all queues (list).
    pub fn failed_index(&self) -> String {
        format!("{}:failed_jobs", self.prefix)
    }

    /// Dead-lettered job ids (list).
    pub fn dead_letter(&self) -> String {
        format!("{}:dead_letter_jobs", self.prefix)
    }

    /// Job record (hash).
    pub fn job(&self, job_id: &str) -> String {
        format!("{}{}", self.job_prefix(), job_id)
    }

    /// Prefix shared by every job record key.
    pub fn job_prefix(&self) -> String {
        format!("{}:job:", self.prefix)
    }

    /// Worker heartbeats (hash: worker id -> status JSON).
    pub fn worker_status(&self) -> String {
        format!("{}:worker:status", self.prefix)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new("jobforge")
    }
}
