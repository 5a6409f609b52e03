//! Persisted job store contract.
//!
//! The orchestrator is the only writer after a job is inserted. Every write
//! is conditional on the job still being ongoing, so terminal states are
//! absorbing at the storage layer as well.
//!
//! Runners in different processes share one store. A runner must hold the
//! job's lease (see [`JobStore::claim_job`]) before running it.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::job::{
    check_visit_lengths, JobStatus, JobStatusFields, NewJob, StoreVisitJob, TerminalStatus,
};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in the ongoing state and return its id.
    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<StoreVisitJob>, StoreError>;

    async fn get_status(&self, job_id: Uuid) -> Result<Option<JobStatusFields>, StoreError>;

    /// Move an ongoing job to a terminal status.
    async fn set_status(&self, job_id: Uuid, status: &TerminalStatus) -> Result<(), StoreError>;

    /// Replace the recorded results of one visit.
    async fn set_visit_result(
        &self,
        job_id: Uuid,
        visit_index: usize,
        metrics: &[i64],
        image_ids: &[String],
    ) -> Result<(), StoreError>;

    /// Ids of all jobs still ongoing, oldest first.
    async fn list_ongoing(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Take or renew the execution lease on an ongoing job for `owner`.
    ///
    /// Returns `false` when the job is missing or finished, or when another
    /// owner holds a lease that has not expired.
    async fn claim_job(
        &self,
        job_id: Uuid,
        owner: Uuid,
        lease: Duration,
    ) -> Result<bool, StoreError>;

    /// Drop `owner`'s lease on a job. Does nothing if someone else holds it.
    async fn release_job(&self, job_id: Uuid, owner: Uuid) -> Result<(), StoreError>;

    /// Check connectivity (for health checks).
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Reject `Failed` statuses that lack an error message or store id.
pub fn validate_terminal_status(status: &TerminalStatus) -> Result<(), StoreError> {
    if let TerminalStatus::Failed { store_id, error } = status {
        if store_id.is_empty() || error.is_empty() {
            return Err(StoreError::InvalidStatus(
                "error message and failed_store_id are required for failed status".to_string(),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} is no longer ongoing")]
    JobFinalized(Uuid),

    #[error("Job {job_id} has no visit at index {visit_index}")]
    VisitOutOfRange { job_id: Uuid, visit_index: usize },

    #[error("Invalid status update: {0}")]
    InvalidStatus(String),

    #[error("Visit result violates invariants: {0}")]
    InvariantViolation(String),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether retrying the same write could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Unavailable(_))
    }
}

/// Job store kept in process memory.
///
/// Used when no database is configured and as the store in tests.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, StoreVisitJob>>,
    leases: Mutex<HashMap<Uuid, Lease>>,
}

struct Lease {
    owner: Uuid,
    until: Instant,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully formed job document, e.g. one left mid-way by a crash.
    pub fn put_job(&self, job: StoreVisitJob) {
        self.jobs.lock().insert(job.id, job);
    }

    fn with_ongoing<T>(
        &self,
        job_id: Uuid,
        f: impl FnOnce(&mut StoreVisitJob) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(&job_id).ok_or(StoreError::NotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(StoreError::JobFinalized(job_id));
        }
        let out = f(job)?;
        job.updated_at = Utc::now();
        Ok(out)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        self.jobs.lock().insert(
            id,
            StoreVisitJob {
                id,
                status: JobStatus::Ongoing,
                error: String::new(),
                failed_store_id: String::new(),
                count: job.count,
                visits: job.visits.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<StoreVisitJob>, StoreError> {
        Ok(self.jobs.lock().get(&job_id).cloned())
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<JobStatusFields>, StoreError> {
        Ok(self.jobs.lock().get(&job_id).map(|job| JobStatusFields {
            status: job.status,
            error: job.error.clone(),
            failed_store_id: job.failed_store_id.clone(),
        }))
    }

    async fn set_status(&self, job_id: Uuid, status: &TerminalStatus) -> Result<(), StoreError> {
        validate_terminal_status(status)?;
        self.with_ongoing(job_id, |job| {
            let (error, failed_store_id) = status.error_fields();
            job.status = status.status();
            job.error = error.to_string();
            job.failed_store_id = failed_store_id.to_string();
            Ok(())
        })
    }

    async fn set_visit_result(
        &self,
        job_id: Uuid,
        visit_index: usize,
        metrics: &[i64],
        image_ids: &[String],
    ) -> Result<(), StoreError> {
        self.with_ongoing(job_id, |job| {
            let visit = job
                .visits
                .get_mut(visit_index)
                .ok_or(StoreError::VisitOutOfRange {
                    job_id,
                    visit_index,
                })?;
            check_visit_lengths(visit.image_urls.len(), image_ids, metrics)
                .map_err(StoreError::InvariantViolation)?;
            visit.image_ids = image_ids.to_vec();
            visit.metrics = metrics.to_vec();
            Ok(())
        })
    }

    async fn list_ongoing(&self) -> Result<Vec<Uuid>, StoreError> {
        let jobs = self.jobs.lock();
        let mut ongoing: Vec<&StoreVisitJob> = jobs
            .values()
            .filter(|job| job.status == JobStatus::Ongoing)
            .collect();
        ongoing.sort_by_key(|job| job.created_at);
        Ok(ongoing.into_iter().map(|job| job.id).collect())
    }

    async fn claim_job(
        &self,
        job_id: Uuid,
        owner: Uuid,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let jobs = self.jobs.lock();
        if !jobs.get(&job_id).is_some_and(|job| job.status == JobStatus::Ongoing) {
            return Ok(false);
        }

        let now = Instant::now();
        let mut leases = self.leases.lock();
        if let Some(held) = leases.get(&job_id) {
            if held.owner != owner && held.until > now {
                return Ok(false);
            }
        }
        leases.insert(
            job_id,
            Lease {
                owner,
                until: now + lease,
            },
        );
        Ok(true)
    }

    async fn release_job(&self, job_id: Uuid, owner: Uuid) -> Result<(), StoreError> {
        let mut leases = self.leases.lock();
        if leases.get(&job_id).is_some_and(|held| held.owner == owner) {
            leases.remove(&job_id);
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
