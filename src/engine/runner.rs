//! Job execution.
//!
//! Each submitted job runs as its own Tokio task. Within a process the
//! runner keeps one task per job id. Across processes a task only runs the
//! job while it holds the job's lease in the store, renewing it at half the
//! lease period. The runner also bounds how many jobs run at once and owns
//! the cancellation tokens used for shutdown.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::engine::orchestrator::{JobOrchestrator, RunOutcome};
use crate::services::job_store::{JobStore, StoreError};

type ActiveJobs = Arc<Mutex<HashMap<Uuid, CancellationToken>>>;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);
const MIN_LEASE: Duration = Duration::from_millis(100);

pub struct JobRunner {
    orchestrator: Arc<JobOrchestrator>,
    store: Arc<dyn JobStore>,
    owner: Uuid,
    lease: Duration,
    limit: Option<usize>,
    permits: Option<Arc<Semaphore>>,
    active: ActiveJobs,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl JobRunner {
    /// `max_concurrent_jobs == 0` runs every submitted job immediately.
    pub fn new(
        orchestrator: Arc<JobOrchestrator>,
        store: Arc<dyn JobStore>,
        max_concurrent_jobs: usize,
    ) -> Self {
        let limit = (max_concurrent_jobs > 0).then_some(max_concurrent_jobs);
        Self {
            orchestrator,
            store,
            owner: Uuid::new_v4(),
            lease: DEFAULT_LEASE,
            limit,
            permits: limit.map(|n| Arc::new(Semaphore::new(n))),
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease.max(MIN_LEASE);
        self
    }

    /// Start running a job in the background.
    ///
    /// The returned handle resolves to `None` if the run was aborted by a
    /// store failure, was cancelled before it started, or another runner
    /// holds the job.
    pub fn submit(&self, job_id: Uuid) -> Result<JoinHandle<Option<RunOutcome>>, RunnerError> {
        if self.shutdown.is_cancelled() {
            return Err(RunnerError::ShuttingDown);
        }

        let cancel = {
            let mut active = self.active.lock();
            if active.contains_key(&job_id) {
                return Err(RunnerError::AlreadyRunning(job_id));
            }
            let token = self.shutdown.child_token();
            active.insert(job_id, token.clone());
            metrics::gauge!("store_visit_jobs_active").set(active.len() as f64);
            token
        };

        let guard = ActiveGuard {
            job_id,
            active: Arc::clone(&self.active),
        };
        let lease = JobLease {
            store: Arc::clone(&self.store),
            job_id,
            owner: self.owner,
            period: self.lease,
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        let permits = self.permits.clone();

        Ok(self.tracker.spawn(async move {
            let _guard = guard;

            let _permit = match permits {
                Some(semaphore) => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    }
                }
                None => None,
            };

            match lease.claim().await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(job_id = %job_id, "Job is not claimable, skipping");
                    return None;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to claim job");
                    return None;
                }
            }

            let result = lease.hold(orchestrator.run(job_id, &cancel), &cancel).await;
            lease.release().await;

            match result {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!(
                        job_id = %job_id,
                        error = %e,
                        "Job aborted, it stays ongoing until resumed"
                    );
                    None
                }
            }
        }))
    }

    /// Cancel one running job. Returns `false` if it was not running.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        match self.active.lock().get(&job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, job_id: Uuid) -> bool {
        self.active.lock().contains_key(&job_id)
    }

    pub fn active_jobs(&self) -> usize {
        self.active.lock().len()
    }

    /// Whether another job would start without waiting for a slot.
    pub fn has_capacity(&self) -> bool {
        self.limit.is_none_or(|limit| self.active_jobs() < limit)
    }

    /// Submit every ongoing job that no other runner holds.
    pub async fn resume_ongoing(&self) -> Result<usize, StoreError> {
        let ongoing = self.store.list_ongoing().await?;
        let mut submitted = 0;

        for job_id in ongoing {
            if self.is_running(job_id) {
                continue;
            }
            // Claimed here so the count leaves out jobs other runners hold.
            // The task renews it.
            if !self.store.claim_job(job_id, self.owner, self.lease).await? {
                tracing::debug!(job_id = %job_id, "Job held by another runner");
                continue;
            }
            match self.submit(job_id) {
                Ok(_) => submitted += 1,
                Err(RunnerError::AlreadyRunning(_)) => {}
                Err(RunnerError::ShuttingDown) => break,
            }
        }

        if submitted > 0 {
            tracing::info!(jobs = submitted, "Resumed ongoing jobs");
        }
        Ok(submitted)
    }

    /// Cancel all jobs and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        tracing::info!(active = self.active_jobs(), "Stopping job runner");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// A runner's hold on one job in the store.
struct JobLease {
    store: Arc<dyn JobStore>,
    job_id: Uuid,
    owner: Uuid,
    period: Duration,
}

impl JobLease {
    async fn claim(&self) -> Result<bool, StoreError> {
        self.store
            .claim_job(self.job_id, self.owner, self.period)
            .await
    }

    /// Drive `run` to completion, renewing the lease meanwhile. Losing the
    /// lease cancels the run.
    async fn hold<F: std::future::Future>(&self, run: F, cancel: &CancellationToken) -> F::Output {
        tokio::pin!(run);
        let mut renew = tokio::time::interval(self.period / 2);
        renew.tick().await;

        loop {
            tokio::select! {
                output = &mut run => return output,
                _ = renew.tick() => match self.claim().await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(job_id = %self.job_id, "Lost job lease, stopping run");
                        cancel.cancel();
                    }
                    Err(e) => {
                        tracing::warn!(job_id = %self.job_id, error = %e, "Failed to renew job lease");
                    }
                },
            }
        }
    }

    async fn release(&self) {
        if let Err(e) = self.store.release_job(self.job_id, self.owner).await {
            tracing::warn!(job_id = %self.job_id, error = %e, "Failed to release job lease");
        }
    }
}

/// Removes a job from the active set when its task ends, however it ends.
struct ActiveGuard {
    job_id: Uuid,
    active: ActiveJobs,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        active.remove(&self.job_id);
        metrics::gauge!("store_visit_jobs_active").set(active.len() as f64);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("Job {0} is already running")]
    AlreadyRunning(Uuid),

    #[error("Job runner is shutting down")]
    ShuttingDown,
}
