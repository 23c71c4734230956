//! Integration tests for the queue state machine.

mod common;

use common::TestQueue;
use jobforge_jobs::store::Transaction;
use jobforge_jobs::{Clock, JobError, JobId, JobState, NewJob, QueueManager, Store};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn test_lower_priority_score_dequeues_first() {
    let tq = TestQueue::new();
    let low = tq.manager.enqueue("default", "report", json!({}), 5).await.unwrap();
    let high = tq.manager.enqueue("default", "report", json!({}), 1).await.unwrap();

    assert_eq!(tq.manager.dequeue_next("default").await.unwrap(), Some(high));
    assert_eq!(tq.manager.dequeue_next("default").await.unwrap(), Some(low));
    assert_eq!(tq.manager.dequeue_next("default").await.unwrap(), None);
}

#[tokio::test]
async fn test_equal_priorities_are_fifo() {
    let tq = TestQueue::new();
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            tq.manager
                .enqueue("email", "welcome", json!({ "n": n }), 3)
                .await
                .unwrap(),
        );
    }

    let mut served = Vec::new();
    while let Some(id) = tq.manager.dequeue_next("email").await.unwrap() {
        served.push(id);
    }
    assert_eq!(served, ids);
}

#[tokio::test]
async fn test_negative_priorities_come_first() {
    let tq = TestQueue::new();
    let normal = tq.manager.enqueue("default", "t", json!({}), 0).await.unwrap();
    let urgent = tq.manager.enqueue("default", "t", json!({}), -10).await.unwrap();

    assert_eq!(tq.manager.list_waiting("default").await.unwrap(), vec![urgent, normal]);
}

#[tokio::test]
async fn test_queues_are_independent() {
    let tq = TestQueue::new();
    let email = tq.manager.enqueue("email", "welcome", json!({}), 0).await.unwrap();
    let image = tq.manager.enqueue("image", "resize", json!({}), 0).await.unwrap();

    assert_eq!(tq.manager.dequeue_next("image").await.unwrap(), Some(image));
    assert_eq!(tq.manager.dequeue_next("image").await.unwrap(), None);
    assert_eq!(tq.manager.dequeue_next("email").await.unwrap(), Some(email));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dequeue_never_claims_twice() {
    let tq = TestQueue::new();
    let mut enqueued = HashSet::new();
    for n in 0..200 {
        enqueued.insert(
            tq.manager
                .enqueue("default", "t", json!({ "n": n }), n % 7)
                .await
                .unwrap(),
        );
    }

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let manager: Arc<QueueManager> = tq.manager.clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(id) = manager.dequeue_next("default").await.unwrap() {
                claimed.push(id);
                tokio::task::yield_now().await;
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        for id in task.await.unwrap() {
            assert!(seen.insert(id.clone()), "job {} claimed twice", id);
        }
    }
    assert_eq!(seen, enqueued);
}

#[tokio::test]
async fn test_failure_is_recorded_with_attempts() {
    let tq = TestQueue::new();
    let id = tq.manager.enqueue("default", "email", json!({}), 0).await.unwrap();
    tq.claim_and_fail("default", "SMTP Connection timed out").await;

    let record = tq.manager.get_job_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Failed);
    assert_eq!(record.error.as_deref(), Some("SMTP Connection timed out"));
    assert_eq!(record.attempts, 1);
    assert!(record.failed_at.is_some());
    assert_eq!(tq.manager.failed_job_ids().await.unwrap(), vec![id]);

    tq.assert_single_membership(&["default"]).await;
}

#[tokio::test]
async fn test_retry_resets_job_to_waiting() {
    let tq = TestQueue::new();
    let id = tq.manager.enqueue("default", "email", json!({}), 4).await.unwrap();
    tq.claim_and_fail("default", "SMTP Connection timed out").await;

    tq.manager.retry_failed_job(&id).await.unwrap();

    let record = tq.manager.get_job_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Waiting);
    assert_eq!(record.attempts, 0);
    assert_eq!(record.error_message(), "");
    assert!(record.failed_at.is_none());
    assert!(record.started_at.is_none());
    assert_eq!(record.priority, 4);
    assert_eq!(tq.manager.list_waiting("default").await.unwrap(), vec![id.clone()]);
    assert!(tq.manager.failed_job_ids().await.unwrap().is_empty());
    assert!(tq.manager.job_ids("default", JobState::Failed).await.unwrap().is_empty());

    tq.assert_single_membership(&["default"]).await;
}

#[tokio::test]
async fn test_retry_twice_fails_second_time() {
    let tq = TestQueue::new();
    let id = tq.manager.enqueue("default", "email", json!({}), 0).await.unwrap();
    tq.claim_and_fail("default", "boom").await;

    tq.manager.retry_failed_job(&id).await.unwrap();
    let err = tq.manager.retry_failed_job(&id).await.unwrap_err();
    assert!(matches!(err, JobError::JobNotFound(ref missing) if missing == id.as_str()));

    // Exactly one waiting entry
    assert_eq!(tq.manager.list_waiting("default").await.unwrap(), vec![id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_retry_has_one_winner() {
    let tq = TestQueue::new();
    let id = tq.manager.enqueue("default", "email", json!({}), 0).await.unwrap();
    tq.claim_and_fail("default", "boom").await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let manager = tq.manager.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move { manager.retry_failed_job(&id).await }));
    }

    let mut wins = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => wins += 1,
            Err(e) => assert!(e.is_not_found(), "unexpected error {}", e),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(tq.manager.list_waiting("default").await.unwrap(), vec![id]);
}

#[tokio::test]
async fn test_dead_letter_then_requeue() {
    let tq = TestQueue::new();
    let id = tq.manager.enqueue("image", "resize", json!({"w": 10}), 2).await.unwrap();
    tq.claim_and_fail("image", "Invalid image format").await;

    tq.manager.move_to_dead_letter(&id).await.unwrap();
    let record = tq.manager.get_job_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Dead);
    assert_eq!(record.error_message(), "Invalid image format");
    assert_eq!(tq.manager.dead_letter_ids().await.unwrap(), vec![id.clone()]);
    assert!(tq.manager.failed_job_ids().await.unwrap().is_empty());
    assert_eq!(tq.manager.list_dead_letter_jobs().await.unwrap().len(), 1);
    tq.assert_single_membership(&["image"]).await;

    tq.manager.requeue_dead_job(&id).await.unwrap();
    let record = tq.manager.get_job_by_id(&id).await.unwrap().unwrap();
    assert_eq!(record.state, JobState::Waiting);
    assert_eq!(record.queue, "image");
    assert_eq!(record.attempts, 0);
    assert!(record.error.is_none());
    assert!(tq.manager.dead_letter_ids().await.unwrap().is_empty());
    assert_eq!(tq.manager.list_waiting("image").await.unwrap(), vec![id.clone()]);
    tq.assert_single_membership(&["image"]).await;

    let err = tq.manager.requeue_dead_job(&id).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_dead_letter_requires_failed_job() {
    let tq = TestQueue::new();
    let id = tq.manager.enqueue("default", "t", json!({}), 0).await.unwrap();
    tq.claim("default").await;

    let err = tq.manager.move_to_dead_letter(&id).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        tq.manager.job_ids("default", JobState::Active).await.unwrap(),
        vec![id]
    );
}

#[tokio::test]
async fn test_attempts_count_failures_and_reset() {
    let tq = TestQueue::new();
    let id = tq.manager.enqueue("default", "t", json!({}), 0).await.unwrap();

    for expected in 1..=3 {
        assert_eq!(tq.manager.record_attempt(&id).await.unwrap(), expected);
    }
    let claimed = tq.claim("default").await;
    tq.manager.move_to_failed("default", &claimed, "again").await.unwrap();
    assert_eq!(tq.manager.get_job_by_id(&id).await.unwrap().unwrap().attempts, 3);

    tq.manager.retry_failed_job(&id).await.unwrap();
    assert_eq!(tq.manager.get_job_by_id(&id).await.unwrap().unwrap().attempts, 0);

    tq.claim_and_fail("default", "again").await;
    assert_eq!(tq.manager.get_job_by_id(&id).await.unwrap().unwrap().attempts, 1);

    tq.manager.move_to_dead_letter(&id).await.unwrap();
    tq.manager.requeue_dead_job(&id).await.unwrap();
    assert_eq!(tq.manager.get_job_by_id(&id).await.unwrap().unwrap().attempts, 0);
}

#[tokio::test]
async fn test_missing_record_becomes_retryable_failure() {
    let tq = TestQueue::new();
    let id = JobId::from("orphan");
    tq.manager
        .submit(NewJob::new("default", "t").id(id.clone()))
        .await
        .unwrap();

    // Wipe the record but leave the waiting entry behind
    let all_fields: Vec<String> = tq
        .store
        .hgetall(&tq.manager.keys().job(id.as_str()))
        .await
        .unwrap()
        .into_keys()
        .collect();
    let all_fields: Vec<&str> = all_fields.iter().map(String::as_str).collect();
    tq.store
        .exec(Transaction::new().hdel(tq.manager.keys().job(id.as_str()), &all_fields))
        .await
        .unwrap();
    assert!(tq.manager.get_job_by_id(&id).await.unwrap().is_none());

    let claimed = tq.claim("default").await;
    let err = tq.manager.get_job_by_id(&claimed).await.unwrap_err();
    assert!(matches!(err, JobError::RecordInconsistency { .. }));

    tq.manager
        .move_to_failed("default", &claimed, "Job record inconsistency: record missing")
        .await
        .unwrap();
    assert_eq!(tq.manager.failed_job_ids().await.unwrap(), vec![id.clone()]);
    assert!(tq.manager.job_ids("default", JobState::Active).await.unwrap().is_empty());

    // The stub written by move_to_failed names its queue, so retry works
    tq.manager.retry_failed_job(&id).await.unwrap();
    assert_eq!(tq.manager.list_waiting("default").await.unwrap(), vec![id]);
}

#[tokio::test]
async fn test_list_failed_jobs_across_queues() {
    let tq = TestQueue::new();
    tq.manager.enqueue("email", "welcome", json!({}), 0).await.unwrap();
    tq.manager.enqueue("image", "resize", json!({}), 0).await.unwrap();
    tq.manager.enqueue("image", "resize", json!({}), 0).await.unwrap();

    tq.claim_and_fail("email", "SMTP Connection timed out").await;
    tq.claim_and_fail("image", "Invalid image format").await;

    let failed = tq.manager.list_failed_jobs().await.unwrap();
    let queues: Vec<&str> = failed.iter().map(|r| r.queue.as_str()).collect();
    assert_eq!(queues, vec!["email", "image"]);

    let system = tq
        .manager
        .get_system_metrics(&["email".to_string(), "image".to_string()])
        .await
        .unwrap();
    assert_eq!(system.total_failed, 2);
    assert_eq!(system.total_waiting, 1);
    assert_eq!(system.total_jobs, 3);

    tq.assert_single_membership(&["email", "image"]).await;
}

#[tokio::test]
async fn test_metrics_on_empty_queue() {
    let tq = TestQueue::new();
    let metrics = tq.manager.get_queue_metrics("empty").await.unwrap();
    assert_eq!(metrics.summary.total(), 0);
    assert_eq!(metrics.latency.samples, 0);
    assert_eq!(metrics.latency.avg_ms, 0.0);
    assert_eq!(metrics.latency.p95_ms, 0);
    assert_eq!(metrics.success_rate, 0.0);
    assert_eq!(metrics.failure_rate, 0.0);
}

#[tokio::test]
async fn test_p95_latency_over_twenty_jobs() {
    let tq = TestQueue::new();
    let start = tq.clock.now();
    for _ in 0..20 {
        tq.manager.enqueue("report", "monthly", json!({}), 0).await.unwrap();
    }

    // Job n completes n * 10ms after the shared creation time
    for _ in 0..20 {
        let id = tq.claim("report").await;
        tq.clock.advance(chrono::Duration::milliseconds(10));
        tq.manager.move_to_completed("report", &id, &json!(null)).await.unwrap();
    }
    assert_eq!(tq.clock.now() - start, chrono::Duration::milliseconds(200));

    let metrics = tq.manager.get_queue_metrics("report").await.unwrap();
    assert_eq!(metrics.latency.samples, 20);
    assert_eq!(metrics.latency.avg_ms, 105.0);
    // sorted[floor(20 * 0.95)] = sorted[19]
    assert_eq!(metrics.latency.p95_ms, 200);
    assert_eq!(metrics.success_rate, 100.0);
}
