use std::sync::Arc;

use crate::config::AppConfig;
use crate::db;
use crate::engine::dispatch::Dispatcher;
use crate::engine::orchestrator::JobOrchestrator;
use crate::engine::retry::WritePolicy;
use crate::engine::runner::JobRunner;
use crate::services::{
    images::{FetchError, HttpImageFetcher},
    job_store::{InMemoryJobStore, JobStore},
    processor::{AreaScorer, ItemProcessor, LatencyInjector},
    queue::{JobQueue, QueueError},
    storage::{ArtifactStore, LocalArtifactStore, R2ArtifactStore, StorageError},
    store_master::{StoreMaster, StoreMasterError},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<dyn JobStore>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(jobs: Arc<dyn JobStore>, dispatcher: Dispatcher) -> Self {
        Self { jobs, dispatcher }
    }
}

/// Connect the configured job store: Postgres if `DATABASE_URL` is set,
/// otherwise process memory.
pub async fn init_job_store(config: &AppConfig) -> Result<Arc<dyn JobStore>, InitError> {
    match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL database");
            let pool = db::init_pool(url, db::pool_size(config.max_concurrent_jobs)).await?;

            tracing::info!("Running database migrations");
            db::run_migrations(&pool).await?;

            Ok(Arc::new(db::PgJobStore::new(pool)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory only");
            Ok(Arc::new(InMemoryJobStore::new()))
        }
    }
}

pub fn init_queue(config: &AppConfig) -> Result<Option<Arc<JobQueue>>, InitError> {
    config
        .redis_url
        .as_deref()
        .map(|url| -> Result<Arc<JobQueue>, InitError> {
            tracing::info!("Connecting to Redis job queue");
            Ok(Arc::new(JobQueue::new(url)?))
        })
        .transpose()
}

/// Build the job runner and everything the orchestrator depends on.
pub fn init_runner(
    config: &AppConfig,
    jobs: Arc<dyn JobStore>,
) -> Result<Arc<JobRunner>, InitError> {
    let store_master = Arc::new(StoreMaster::load(&config.store_master_path)?);

    let artifacts: Arc<dyn ArtifactStore> = match config.r2() {
        Some(settings) => {
            tracing::info!(bucket = settings.bucket, "Storing artifacts in R2");
            Arc::new(R2ArtifactStore::new(&settings)?)
        }
        None => {
            tracing::info!(dir = %config.artifact_dir.display(), "Storing artifacts locally");
            Arc::new(LocalArtifactStore::new(&config.artifact_dir))
        }
    };

    let processor = Arc::new(ItemProcessor::new(
        Arc::new(HttpImageFetcher::new(config.fetch_timeout())?),
        artifacts,
        Arc::new(AreaScorer),
        LatencyInjector::new(
            config.processing_delay_min_ms,
            config.processing_delay_max_ms,
        ),
    ));

    let orchestrator = Arc::new(JobOrchestrator::new(
        Arc::clone(&jobs),
        store_master,
        processor,
        WritePolicy::new(config.store_write_attempts, config.store_write_backoff()),
    ));

    Ok(Arc::new(
        JobRunner::new(orchestrator, jobs, config.max_concurrent_jobs)
            .with_lease(config.job_lease()),
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    StoreMaster(#[from] StoreMasterError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
