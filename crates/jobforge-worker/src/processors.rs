//! Demo processors for the bundled job types.
//!
//! Each processor sleeps to simulate work. `email` and `image` fail when
//! the payload carries `"fail": true`, so failure paths can be exercised on
//! demand.

use futures::FutureExt;
use jobforge_jobs::{JobRecord, ProcessorError, ProcessorRegistry, ProcessorResult};
use serde_json::json;
use std::time::Duration;

/// Simulated latency per job type.
#[derive(Debug, Clone, Copy)]
pub struct DemoTimings {
    pub email: Duration,
    pub image: Duration,
    pub report: Duration,
    pub default: Duration,
}

impl Default for DemoTimings {
    fn default() -> Self {
        Self {
            email: Duration::from_millis(1500),
            image: Duration::from_secs(4),
            report: Duration::from_secs(5),
            default: Duration::from_millis(500),
        }
    }
}

impl DemoTimings {
    /// No simulated latency.
    pub const fn instant() -> Self {
        Self {
            email: Duration::ZERO,
            image: Duration::ZERO,
            report: Duration::ZERO,
            default: Duration::ZERO,
        }
    }
}

fn wants_failure(job: &JobRecord) -> bool {
    job.payload
        .get("fail")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

async fn send_email(job: JobRecord, latency: Duration) -> ProcessorResult {
    tokio::time::sleep(latency).await;
    if wants_failure(&job) {
        return Err(ProcessorError::new("SMTP Connection timed out"));
    }
    let recipient = job
        .payload
        .get("email")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown");
    Ok(json!({ "sent": true, "recipient": recipient }))
}

async fn resize_image(job: JobRecord, latency: Duration) -> ProcessorResult {
    tokio::time::sleep(latency).await;
    if wants_failure(&job) {
        return Err(ProcessorError::new("Invalid image format"));
    }
    Ok(json!({ "width": 1024, "height": 768, "format": "webp" }))
}

async fn generate_report(latency: Duration) -> ProcessorResult {
    tokio::time::sleep(latency).await;
    Ok(json!({ "generated": true, "size": "2.4MB" }))
}

/// Registry with the `email`, `image` and `report` processors and a
/// generic default.
pub fn demo_registry(timings: DemoTimings) -> ProcessorRegistry {
    ProcessorRegistry::with_default_fn(move |_| {
        async move {
            tokio::time::sleep(timings.default).await;
            Ok(json!({ "processed": true }))
        }
        .boxed()
    })
    .register_fn("email", move |job| send_email(job, timings.email).boxed())
    .register_fn("image", move |job| resize_image(job, timings.image).boxed())
    .register_fn("report", move |_| generate_report(timings.report).boxed())
}
