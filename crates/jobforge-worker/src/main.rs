//! # Jobforge Worker
//!
//! Worker process: sweeps the configured queues, runs jobs through the
//! registered processors and reports its liveness until Ctrl+C or SIGTERM.

use anyhow::Context;
use jobforge_config::{AppConfig, ConfigLoader};
use jobforge_core::init_logging;
use jobforge_jobs::{
    create_pool, register_metrics, LivenessRegistry, QueueManager, RedisStore, Store,
    SystemClock, WorkerHandle, WorkerScheduler, WorkerSchedulerConfig,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod processors;

use processors::{demo_registry, DemoTimings};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be initialised if configuration failed
        eprintln!("Worker error: {:#}", e);
        error!("Worker error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config_loader =
        ConfigLoader::from_default_location().context("Failed to load configuration")?;
    let config = config_loader.get().await;

    init_logging(&config.logging).context("Failed to initialise logging")?;

    info!("Starting Jobforge worker...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.app.environment);

    register_metrics();

    let scheduler = build_scheduler(&config).await?;
    tokio::spawn(stop_on_signal(scheduler.handle()));

    let stats = scheduler.run().await.context("Worker scheduler failed")?;
    info!(
        worker_id = %stats.worker_id,
        claimed = stats.claimed,
        completed = stats.completed,
        failed = stats.failed,
        "Worker shutdown complete"
    );
    Ok(())
}

async fn build_scheduler(config: &AppConfig) -> anyhow::Result<WorkerScheduler> {
    let pool = create_pool(&config.redis)
        .await
        .context("Failed to connect to Redis")?;
    let store: Arc<dyn Store> = Arc::new(RedisStore::new(pool));

    let manager = Arc::new(QueueManager::new(
        store.clone(),
        config.redis.key_prefix.as_str(),
    ));
    let liveness = Arc::new(LivenessRegistry::with_clock(
        store,
        config.redis.key_prefix.as_str(),
        config.worker.heartbeat_timeout(),
        Arc::new(SystemClock),
    ));

    let scheduler_config = WorkerSchedulerConfig::from(&config.worker);
    info!(
        worker_id = %scheduler_config.worker_id,
        queues = ?scheduler_config.queues,
        concurrency = scheduler_config.concurrency,
        "Worker configured"
    );
    if let Some(max_attempts) = config.worker.max_attempts {
        warn!(
            max_attempts = max_attempts,
            "Automatic dead-letter escalation enabled"
        );
    }

    Ok(WorkerScheduler::new(
        manager,
        liveness,
        demo_registry(DemoTimings::default()),
        scheduler_config,
    ))
}

async fn stop_on_signal(handle: WorkerHandle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, draining in-flight jobs...");
        }
        () = terminate => {
            info!("Received terminate signal, draining in-flight jobs...");
        }
    }

    handle.shutdown();
}
