//! Queue summaries and derived metrics.

use serde::{Deserialize, Serialize};

/// Job counts of one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    /// Queue name.
    pub name: String,
    /// Jobs waiting in the priority structure.
    pub waiting: u64,
    /// Jobs executing.
    pub active: u64,
    /// Jobs completed.
    pub completed: u64,
    /// Jobs failed and not yet retried or dead-lettered.
    pub failed: u64,
    /// Whether workers skip this queue.
    pub paused: bool,
}

impl QueueSummary {
    /// Total jobs across all states.
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed
    }
}

/// Latency statistics over completed jobs, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyStats {
    /// Number of completed jobs measured.
    pub samples: usize,
    /// Mean `completedAt - createdAt`.
    pub avg_ms: f64,
    /// 95th percentile (nearest rank below).
    pub p95_ms: i64,
}

impl LatencyStats {
    /// Computes statistics from raw latencies. No samples yields zeros.
    pub fn from_samples(mut latencies: Vec<i64>) -> Self {
        if latencies.is_empty() {
            return Self::default();
        }
        latencies.sort_unstable();

        let samples = latencies.len();
        let sum: i64 = latencies.iter().sum();
        // floor(n * 0.95) is always < n
        let p95_index = samples * 95 / 100;

        Self {
            samples,
            avg_ms: sum as f64 / samples as f64,
            p95_ms: latencies[p95_index],
        }
    }
}

/// Derived metrics of one queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    /// Counts per state.
    pub summary: QueueSummary,
    /// Completion latency.
    pub latency: LatencyStats,
    /// Completed jobs as a percentage of observed jobs.
    pub success_rate: f64,
    /// Failed jobs as a percentage of observed jobs.
    pub failure_rate: f64,
}

/// Totals across a set of queues.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// Per-queue summaries.
    pub queues: Vec<QueueSummary>,
    /// Total waiting jobs.
    pub total_waiting: u64,
    /// Total active jobs.
    pub total_active: u64,
    /// Total completed jobs.
    pub total_completed: u64,
    /// Total failed jobs.
    pub total_failed: u64,
    /// Total jobs across the states above.
    pub total_jobs: u64,
    /// Dead-letter list size.
    pub dead_letter: u64,
    /// Completed jobs as a percentage of the total.
    pub success_rate: f64,
    /// Failed jobs as a percentage of the total.
    pub failure_rate: f64,
}

impl SystemMetrics {
    /// Aggregates queue summaries.
    pub fn from_summaries(queues: Vec<QueueSummary>, dead_letter: u64) -> Self {
        let mut metrics = Self {
            dead_letter,
            ..Self::default()
        };
        for summary in &queues {
            metrics.total_waiting += summary.waiting;
            metrics.total_active += summary.active;
            metrics.total_completed += summary.completed;
            metrics.total_failed += summary.failed;
        }
        metrics.total_jobs = metrics.total_waiting
            + metrics.total_active
            + metrics.total_completed
            + metrics.total_failed;
        metrics.success_rate = percentage(metrics.total_completed, metrics.total_jobs);
        metrics.failure_rate = percentage(metrics.total_failed, metrics.total_jobs);
        metrics.queues = queues;
        metrics
    }
}

/// `part / total` as a percentage, or 0 when there is nothing to measure.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_empty() {
        let stats = LatencyStats::from_samples(vec![]);
        assert_eq!(stats, LatencyStats::default());
    }

    #[test]
    fn test_latency_single_sample() {
        let stats = LatencyStats::from_samples(vec![120]);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.avg_ms, 120.0);
        assert_eq!(stats.p95_ms, 120);
    }

    #[test]
    fn test_latency_p95_nearest_rank() {
        // 20 down to 1; floor(20 * 0.95) = 19 -> the largest value
        let samples: Vec<i64> = (1..=20).rev().collect();
        let stats = LatencyStats::from_samples(samples);
        assert_eq!(stats.avg_ms, 10.5);
        assert_eq!(stats.p95_ms, 20);

        // floor(10 * 0.95) = 9 -> the largest of ten
        let stats = LatencyStats::from_samples((1..=10).map(|v| v * 100).collect());
        assert_eq!(stats.p95_ms, 1000);

        // floor(100 * 0.95) = 95 -> the 96th smallest
        let stats = LatencyStats::from_samples((1..=100).collect());
        assert_eq!(stats.p95_ms, 96);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(4, 4), 100.0);
    }

    #[test]
    fn test_system_metrics_totals() {
        let queues = vec![
            QueueSummary {
                name: "email".to_string(),
                waiting: 1,
                active: 1,
                completed: 6,
                failed: 2,
                paused: false,
            },
            QueueSummary {
                name: "image".to_string(),
                completed: 10,
                ..QueueSummary::default()
            },
        ];

        let metrics = SystemMetrics::from_summaries(queues, 3);
        assert_eq!(metrics.total_jobs, 20);
        assert_eq!(metrics.total_completed, 16);
        assert_eq!(metrics.dead_letter, 3);
        assert_eq!(metrics.success_rate, 80.0);
        assert_eq!(metrics.failure_rate, 10.0);
        assert_eq!(metrics.queues.len(), 2);
    }

    #[test]
    fn test_summary_default() {
        let summary = QueueSummary::default();
        assert_eq!(summary.total(), 0);
        assert!(!summary.paused);
    }
}
