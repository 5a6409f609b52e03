use retail_pulse::{
    app_state,
    config::AppConfig,
    engine::runner::{JobRunner, RunnerError},
    services::queue::{JobQueue, QueueError},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting store visit worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let queue = app_state::init_queue(&config)
        .expect("Failed to initialize job queue")
        .expect("REDIS_URL must be set for the worker");

    let jobs = app_state::init_job_store(&config)
        .await
        .expect("Failed to initialize job store");

    let runner = app_state::init_runner(&config, jobs).expect("Failed to initialize job runner");

    match queue.in_flight().await {
        Ok(0) => {}
        Ok(entries) => tracing::info!(entries, "Queue entries awaiting acknowledgement"),
        Err(e) => tracing::warn!(error = %e, "Failed to read processing list"),
    }

    // Other workers may be live; the store lease keeps their jobs out of
    // this sweep.
    match runner.resume_ongoing().await {
        Ok(count) => tracing::info!(jobs = count, "Resume sweep finished"),
        Err(e) => tracing::error!(error = %e, "Resume sweep failed"),
    }

    tracing::info!("Worker ready, starting job processing loop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // Main processing loop
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Shutdown signal received");
                break;
            }
            result = process_next_job(&runner, &queue) => match result {
                Ok(true) => {
                    tracing::debug!("Job started, checking for next job");
                }
                Ok(false) => {
                    tracing::trace!("No jobs available, sleeping");
                    sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error polling queue, will retry");
                    sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    runner.shutdown().await;
    tracing::info!("Worker stopped");
}

/// Start the next queued job.
/// Returns Ok(true) if a job was taken, Ok(false) if none was available.
async fn process_next_job(runner: &JobRunner, queue: &Arc<JobQueue>) -> Result<bool, QueueError> {
    if !runner.has_capacity() {
        return Ok(false);
    }

    let job = match queue.dequeue().await? {
        Some(j) => j,
        None => return Ok(false),
    };

    tracing::info!(job_id = %job.job_id, "Processing store visit job");

    match runner.submit(job.job_id) {
        Ok(handle) => {
            let queue = Arc::clone(queue);
            tokio::spawn(async move {
                match handle.await {
                    Ok(Some(outcome)) => {
                        tracing::debug!(job_id = %job.job_id, outcome = ?outcome, "Job run ended");
                    }
                    Ok(None) => {
                        tracing::warn!(job_id = %job.job_id, "Job left ongoing");
                    }
                    Err(e) => {
                        tracing::error!(job_id = %job.job_id, error = %e, "Job task failed");
                    }
                }
                if let Err(e) = queue.complete(&job).await {
                    tracing::error!(job_id = %job.job_id, error = %e, "Failed to acknowledge job");
                }
            });
        }
        Err(RunnerError::AlreadyRunning(_)) => {
            tracing::debug!(job_id = %job.job_id, "Job already running, dropping duplicate");
            queue.complete(&job).await?;
        }
        Err(RunnerError::ShuttingDown) => return Ok(false),
    }

    Ok(true)
}
