use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::services::job_store::StoreError;

/// Bounded retry for job store reads and writes.
///
/// Only transient errors are retried. A job whose status write keeps
/// failing is left ongoing and picked up again by the resume sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(200),
        }
    }
}

impl WritePolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn run<T, F, Fut>(&self, what: &str, job_id: Uuid, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    tracing::warn!(
                        job_id = %job_id,
                        operation = what,
                        attempt,
                        max_attempts = self.attempts,
                        error = %e,
                        "Job store operation failed, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
