//! Background workers.
//!
//! Two cron jobs run next to the engine: the delayed-reward reconciler
//! sweep and the per-user cache cleanup. Startup is gated on a leader env
//! flag so only one instance of a deployment runs them; `stop()` signals
//! every job through a broadcast channel and shuts the scheduler down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::engine::AdaptiveEngine;
use crate::reconcile::Reconciler;

static WORKER_LEADER: AtomicBool = AtomicBool::new(false);

pub fn is_worker_leader() -> bool {
    WORKER_LEADER.load(Ordering::Relaxed)
}

fn set_worker_leader(val: bool) {
    WORKER_LEADER.store(val, Ordering::Relaxed);
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
}

pub struct WorkerManager {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    engine: Arc<AdaptiveEngine>,
    reconciler: Arc<Reconciler>,
}

impl WorkerManager {
    pub async fn new(engine: Arc<AdaptiveEngine>) -> Result<Self, WorkerError> {
        let scheduler = JobScheduler::new().await?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let reconciler = Arc::new(Reconciler::new(engine.clone()));
        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            engine,
            reconciler,
        })
    }

    pub async fn start(&self) -> Result<(), WorkerError> {
        let leader = std::env::var("MNEMO_WORKER_LEADER")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        if !leader {
            info!("MNEMO_WORKER_LEADER not set, skipping worker startup");
            return Ok(());
        }

        set_worker_leader(true);
        info!("starting workers (leader mode)");

        let enable_reconciler = std::env::var("MNEMO_ENABLE_RECONCILER")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let enable_cache_cleanup = std::env::var("MNEMO_ENABLE_CACHE_CLEANUP")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let scheduler = self.scheduler.lock().await;

        if enable_reconciler {
            let reconciler = Arc::clone(&self.reconciler);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let interval = Duration::from_secs(reconciler.sweep_interval_secs());
            let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
                let reconciler = Arc::clone(&reconciler);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        result = reconciler.sweep_now() => {
                            if let Err(e) = result {
                                error!(error = %e, "reconciler sweep error");
                            }
                        }
                    }
                })
            })?;
            scheduler.add(job).await?;
            info!(
                interval_secs = interval.as_secs(),
                "reconciler sweep scheduled"
            );
        }

        if enable_cache_cleanup {
            let engine = Arc::clone(&self.engine);
            let shutdown_rx = self.shutdown_tx.subscribe();
            let interval = Duration::from_secs(engine.config().cache.cleanup_interval_secs);
            let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut rx = shutdown_rx.resubscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = rx.recv() => {},
                        _ = async {
                            let evicted = engine.cleanup_stale(Utc::now().timestamp_millis());
                            if evicted > 0 {
                                let stats = engine.cache_stats();
                                info!(
                                    evicted,
                                    records = stats.records,
                                    runtimes = stats.runtimes,
                                    "cache cleanup"
                                );
                            }
                        } => {}
                    }
                })
            })?;
            scheduler.add(job).await?;
            info!(
                interval_secs = interval.as_secs(),
                "cache cleanup scheduled"
            );
        }

        scheduler.start().await?;
        info!("all workers started");
        Ok(())
    }

    pub async fn stop(&self) {
        if !is_worker_leader() {
            return;
        }

        info!("stopping workers");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(e) = scheduler.shutdown().await {
            warn!(error = %e, "error shutting down scheduler");
        }

        set_worker_leader(false);
        info!("workers stopped");
    }
}
