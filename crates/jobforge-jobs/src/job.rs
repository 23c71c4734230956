//! Job records and their lifecycle states.

use crate::error::{JobError, JobResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Creates a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Creates a job ID from a string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the job ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// waiting ──► active ──► completed
///                │
///                ▼
///             failed ──► dead
///                │         │
///   waiting ◄────┴─────────┘   (retry / requeue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// In the queue's priority structure, ready to be claimed.
    #[default]
    Waiting,
    /// Claimed by a worker and executing.
    Active,
    /// Processor returned a result.
    Completed,
    /// Processor failed; eligible for retry or dead-lettering.
    Failed,
    /// Parked in the dead-letter list.
    Dead,
}

impl JobState {
    /// Returns the wire name of the state.
    pub const fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// Returns true if the state machine allows moving from `self` to `next`.
    pub const fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Waiting, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
                | (JobState::Failed, JobState::Waiting)
                | (JobState::Failed, JobState::Dead)
                | (JobState::Dead, JobState::Waiting)
        )
    }

    /// Returns true if no worker will touch a job in this state again
    /// without an operator action.
    pub const fn is_settled(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

/// Hash field names of a stored job record.
pub mod fields {
    pub const ID: &str = "id";
    pub const QUEUE: &str = "queue";
    pub const TYPE: &str = "type";
    pub const PAYLOAD: &str = "payload";
    pub const PRIORITY: &str = "priority";
    pub const STATE: &str = "state";
    pub const ATTEMPTS: &str = "attempts";
    pub const FAILURES: &str = "failures";
    pub const ERROR: &str = "error";
    pub const RESULT: &str = "result";
    pub const CREATED_AT: &str = "createdAt";
    pub const QUEUED_AT: &str = "queuedAt";
    pub const STARTED_AT: &str = "startedAt";
    pub const COMPLETED_AT: &str = "completedAt";
    pub const FAILED_AT: &str = "failedAt";

    /// Fields cleared when a job re-enters the waiting state.
    pub const RESET_ON_REQUEUE: &[&str] = &[ERROR, RESULT, STARTED_AT, COMPLETED_AT, FAILED_AT];
}

/// A unit of work and its lifecycle metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Job ID.
    pub id: JobId,
    /// Queue the job belongs to.
    pub queue: String,
    /// Selects the processor.
    #[serde(rename = "type")]
    pub job_type: String,
    /// Opaque input for the processor.
    pub payload: serde_json::Value,
    /// Lower is served first.
    pub priority: i32,
    /// Lifecycle state.
    pub state: JobState,
    /// Failed processing attempts since the job last entered the waiting state.
    pub attempts: u32,
    /// Failed processing attempts since enqueue or the last dead-letter
    /// requeue. Operator retries keep it.
    pub failures: u32,
    /// Last processor error message.
    pub error: Option<String>,
    /// Processor output on success.
    pub result: Option<serde_json::Value>,
    /// When the job was enqueued.
    pub created_at: Option<DateTime<Utc>>,
    /// When the job last entered the waiting state.
    pub queued_at: Option<DateTime<Utc>>,
    /// When a worker last moved the job to active.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job completed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the job last failed.
    pub failed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Creates a waiting record.
    pub fn new(
        id: JobId,
        queue: impl Into<String>,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            job_type: job_type.into(),
            payload,
            priority,
            state: JobState::Waiting,
            attempts: 0,
            failures: 0,
            error: None,
            result: None,
            created_at: Some(now),
            queued_at: Some(now),
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Last error message, or the empty string.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }

    /// Time from creation to completion, for completed jobs.
    pub fn latency(&self) -> Option<chrono::Duration> {
        match (self.created_at, self.completed_at) {
            (Some(created), Some(completed)) => Some(completed - created),
            _ => None,
        }
    }

    /// Encodes the record as flat hash fields.
    ///
    /// Payload and result are JSON; timestamps are epoch milliseconds;
    /// absent optional fields are omitted.
    pub fn to_fields(&self) -> JobResult<Vec<(String, String)>> {
        let mut out = vec![
            (fields::ID.to_string(), self.id.to_string()),
            (fields::QUEUE.to_string(), self.queue.clone()),
            (fields::TYPE.to_string(), self.job_type.clone()),
            (fields::PAYLOAD.to_string(), serde_json::to_string(&self.payload)?),
            (fields::PRIORITY.to_string(), self.priority.to_string()),
            (fields::STATE.to_string(), self.state.to_string()),
            (fields::ATTEMPTS.to_string(), self.attempts.to_string()),
            (fields::FAILURES.to_string(), self.failures.to_string()),
        ];

        if let Some(error) = &self.error {
            out.push((fields::ERROR.to_string(), error.clone()));
        }
        if let Some(result) = &self.result {
            out.push((fields::RESULT.to_string(), serde_json::to_string(result)?));
        }

        let timestamps = [
            (fields::CREATED_AT, self.created_at),
            (fields::QUEUED_AT, self.queued_at),
            (fields::STARTED_AT, self.started_at),
            (fields::COMPLETED_AT, self.completed_at),
            (fields::FAILED_AT, self.failed_at),
        ];
        for (name, value) in timestamps {
            if let Some(ts) = value {
                out.push((name.to_string(), encode_timestamp(ts)));
            }
        }

        Ok(out)
    }

    /// Decodes a record from its hash fields.
    ///
    /// An empty map means the record does not exist and yields `None`.
    /// A record without a queue or state, or with unparseable values, is
    /// reported as [`JobError::RecordInconsistency`].
    pub fn from_fields(id: &JobId, map: &HashMap<String, String>) -> JobResult<Option<Self>> {
        if map.is_empty() {
            return Ok(None);
        }

        let bad = |message: String| JobError::inconsistency(id.as_str(), message);
        let required = |name: &str| {
            map.get(name)
                .ok_or_else(|| bad(format!("missing field '{}'", name)))
        };

        let queue = required(fields::QUEUE)?.clone();
        let state = required(fields::STATE)?.parse::<JobState>().map_err(bad)?;

        let payload = match map.get(fields::PAYLOAD) {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| bad(format!("invalid payload: {}", e)))?,
            None => serde_json::Value::Null,
        };
        let result = match map.get(fields::RESULT) {
            Some(raw) => Some(
                serde_json::from_str(raw).map_err(|e| bad(format!("invalid result: {}", e)))?,
            ),
            None => None,
        };
        let priority = match map.get(fields::PRIORITY) {
            Some(raw) => raw
                .parse()
                .map_err(|_| bad(format!("invalid priority '{}'", raw)))?,
            None => 0,
        };
        let counter = |name: &str| -> JobResult<u32> {
            map.get(name).map_or(Ok(0), |raw| {
                raw.parse()
                    .map_err(|_| bad(format!("invalid {} '{}'", name, raw)))
            })
        };
        let attempts = counter(fields::ATTEMPTS)?;
        let failures = counter(fields::FAILURES)?;

        let timestamp = |name: &str| -> JobResult<Option<DateTime<Utc>>> {
            map.get(name)
                .map(|raw| {
                    decode_timestamp(raw)
                        .ok_or_else(|| bad(format!("invalid {} '{}'", name, raw)))
                })
                .transpose()
        };

        Ok(Some(Self {
            id: id.clone(),
            queue,
            job_type: map.get(fields::TYPE).cloned().unwrap_or_default(),
            payload,
            priority,
            state,
            attempts,
            failures,
            error: map.get(fields::ERROR).filter(|e| !e.is_empty()).cloned(),
            result,
            created_at: timestamp(fields::CREATED_AT)?,
            queued_at: timestamp(fields::QUEUED_AT)?,
            started_at: timestamp(fields::STARTED_AT)?,
            completed_at: timestamp(fields::COMPLETED_AT)?,
            failed_at: timestamp(fields::FAILED_AT)?,
        }))
    }
}

/// Encodes a timestamp as epoch milliseconds.
pub fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.timestamp_millis().to_string()
}

/// Decodes epoch milliseconds.
pub fn decode_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}
