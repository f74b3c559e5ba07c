//! services/api/src/worker/run.rs
//!
//! The worker's polling loop: fetch pending tasks, claim each one atomically,
//! and hand the winners to the pipeline under a bounded concurrency limit.
//! Multiple worker processes can run this loop against the same store; the
//! claim is the only coordination point between them.

use crate::worker::pipeline::Pipeline;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tunables for the polling loop.
#[derive(Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub concurrency: usize,
    pub claim_staleness: ChronoDuration,
}

/// Runs the polling loop until `shutdown` is cancelled, then drains
/// in-flight tasks before returning.
pub async fn run_worker(
    pipeline: Arc<Pipeline>,
    settings: WorkerSettings,
    shutdown: CancellationToken,
) {
    info!(
        "Worker loop started (poll every {:?}, concurrency {})",
        settings.poll_interval, settings.concurrency
    );
    let semaphore = Arc::new(Semaphore::new(settings.concurrency));
    let mut interval = tokio::time::interval(settings.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        // Fetch a little more than we can run so claim races lost to other
        // workers do not leave this poll cycle idle.
        let batch = (settings.concurrency * 2) as i64;
        let pending = match pipeline
            .store
            .list_pending_tasks(batch, settings.claim_staleness)
            .await
        {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Failed to poll for pending tasks: {}", e);
                continue;
            }
        };

        for task in pending {
            // Take a permit before claiming so we never claim work we
            // cannot start; an unstarted claim would sit stale until the
            // re-claim threshold passes.
            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };

            match pipeline.store.claim_task(task.id, settings.claim_staleness).await {
                Ok(true) => {
                    let pipeline = pipeline.clone();
                    tokio::spawn(async move {
                        pipeline.run_task(&task).await;
                        drop(permit);
                    });
                }
                Ok(false) => {
                    // Another worker won the race.
                    drop(permit);
                }
                Err(e) => {
                    warn!(task_id = %task.id, "Claim attempt failed: {}", e);
                    drop(permit);
                }
            }
        }
    }

    info!("Worker loop stopping, waiting for in-flight tasks");
    // Acquiring every permit proves all spawned pipelines have finished.
    let _ = semaphore.acquire_many(settings.concurrency as u32).await;
    info!("Worker loop stopped");
}
