//! Redis hand-off between the API and the worker.
//!
//! Pending jobs sit in `<prefix>:jobs`. A dequeued job is moved atomically to
//! `<prefix>:processing` and stays there until the worker acknowledges it.
//! The processing list is shared by every worker and is never cleared on
//! startup. The job store remains the source of truth: an entry lost from
//! Redis only delays a job until the next resume sweep, and the store lease
//! decides which worker runs it.

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_PREFIX: &str = "retail_pulse";

/// Queue payload. The job document itself lives in the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
}

impl QueuedJob {
    fn encode(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(QueueError::Serialize)
    }
}

pub struct JobQueue {
    client: redis::Client,
    pending_key: String,
    processing_key: String,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        Self::with_prefix(redis_url, DEFAULT_PREFIX)
    }

    /// Queue under a custom key prefix, e.g. to isolate test runs.
    pub fn with_prefix(redis_url: &str, prefix: &str) -> Result<Self, QueueError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            pending_key: format!("{prefix}:jobs"),
            processing_key: format!("{prefix}:processing"),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let payload = job.encode()?;
        self.conn()
            .await?
            .lpush::<_, _, ()>(&self.pending_key, payload)
            .await?;
        tracing::debug!(job_id = %job.job_id, "Enqueued job");
        Ok(())
    }

    /// Take the oldest pending job, if any, into the processing list.
    pub async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let payload: Option<String> = self
            .conn()
            .await?
            .rpoplpush(&self.pending_key, &self.processing_key)
            .await?;

        payload
            .map(|raw| serde_json::from_str(&raw).map_err(QueueError::Serialize))
            .transpose()
    }

    /// Acknowledge a dequeued job.
    pub async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let payload = job.encode()?;
        self.conn()
            .await?
            .lrem::<_, _, ()>(&self.processing_key, 1, payload)
            .await?;
        Ok(())
    }

    /// Entries dequeued but not yet acknowledged, across all workers.
    pub async fn in_flight(&self) -> Result<u64, QueueError> {
        Ok(self.conn().await?.llen(&self.processing_key).await?)
    }

    /// Jobs waiting to be picked up.
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.conn().await?.llen(&self.pending_key).await?)
    }

    pub async fn health_check(&self) -> Result<(), QueueError> {
        redis::cmd("PING")
            .query_async::<String>(&mut self.conn().await?)
            .await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Queue payload error: {0}")]
    Serialize(#[from] serde_json::Error),
}
