use std::sync::Arc;
use uuid::Uuid;

use crate::engine::runner::{JobRunner, RunnerError};
use crate::services::queue::{JobQueue, QueueError, QueuedJob};

/// Where newly accepted jobs are sent.
#[derive(Clone)]
pub enum Dispatcher {
    /// Run in this process.
    Inline(Arc<JobRunner>),
    /// Hand off to the worker through Redis.
    Queue(Arc<JobQueue>),
}

impl Dispatcher {
    pub async fn dispatch(&self, job_id: Uuid) -> Result<(), DispatchError> {
        match self {
            Dispatcher::Inline(runner) => {
                runner.submit(job_id)?;
            }
            Dispatcher::Queue(queue) => {
                queue.enqueue(&QueuedJob { job_id }).await?;
            }
        }
        Ok(())
    }

    pub fn queue(&self) -> Option<&JobQueue> {
        match self {
            Dispatcher::Queue(queue) => Some(queue),
            Dispatcher::Inline(_) => None,
        }
    }

    pub fn runner(&self) -> Option<&Arc<JobRunner>> {
        match self {
            Dispatcher::Inline(runner) => Some(runner),
            Dispatcher::Queue(_) => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}
