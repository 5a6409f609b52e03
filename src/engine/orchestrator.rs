//! Job orchestrator: the `Ongoing -> {Completed, Failed}` state machine.
//!
//! Visits are walked strictly in order and images within a visit in source
//! order, one at a time. The first error of any kind ends the whole job.
//! A visit's results are written once, after its images are done, or once
//! for the completed prefix when the run stops part-way through the visit.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::resume::{ResumeCursor, VisitCheckpoint};
use crate::engine::retry::WritePolicy;
use crate::models::job::{JobStatus, TerminalStatus, VisitResult};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::processor::{ItemProcessor, ProcessError};
use crate::services::storage::ArtifactScope;
use crate::services::store_master::StoreMaster;

/// How a single run of a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { store_id: String, error: String },
    /// Stopped by cancellation; the job is still ongoing and resumable.
    Cancelled,
    /// The job was already terminal; nothing was done.
    AlreadyFinished(JobStatus),
}

enum VisitOutcome {
    Done,
    Failed(String),
    Cancelled,
}

pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    store_master: Arc<StoreMaster>,
    processor: Arc<ItemProcessor>,
    writes: WritePolicy,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        store_master: Arc<StoreMaster>,
        processor: Arc<ItemProcessor>,
        writes: WritePolicy,
    ) -> Self {
        Self {
            store,
            store_master,
            processor,
            writes,
        }
    }

    /// Run a job from its persisted state until it finishes or is cancelled.
    ///
    /// The caller must hold the job's lease in the store.
    pub async fn run(
        &self,
        job_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, OrchestratorError> {
        let job = self
            .writes
            .run("load job", job_id, || self.store.get_job(job_id))
            .await
            .map_err(|source| OrchestratorError::Load { job_id, source })?
            .ok_or(OrchestratorError::NotFound(job_id))?;

        if job.status.is_terminal() {
            tracing::debug!(job_id = %job_id, status = %job.status, "Job already finished");
            return Ok(RunOutcome::AlreadyFinished(job.status));
        }

        tracing::info!(job_id = %job_id, visits = job.visits.len(), "Starting job");

        for (visit_index, visit) in job.visits.iter().enumerate() {
            match self.run_visit(job_id, visit_index, visit, cancel).await? {
                VisitOutcome::Done => {}
                VisitOutcome::Failed(error) => {
                    return self
                        .finish(job_id, TerminalStatus::failed(&visit.store_id, error))
                        .await;
                }
                VisitOutcome::Cancelled => {
                    tracing::info!(
                        job_id = %job_id,
                        visit_index,
                        "Job cancelled, left ongoing"
                    );
                    return Ok(RunOutcome::Cancelled);
                }
            }
        }

        self.finish(job_id, TerminalStatus::Completed).await
    }

    async fn run_visit(
        &self,
        job_id: Uuid,
        visit_index: usize,
        visit: &VisitResult,
        cancel: &CancellationToken,
    ) -> Result<VisitOutcome, OrchestratorError> {
        if !self.store_master.contains(&visit.store_id) {
            return Ok(VisitOutcome::Failed(format!(
                "store_id {} does not exist",
                visit.store_id
            )));
        }

        let cursor = match ResumeCursor::for_visit(visit) {
            Ok(cursor) => cursor,
            Err(reason) => {
                return Ok(VisitOutcome::Failed(format!("corrupt visit record: {reason}")));
            }
        };

        if cursor.is_complete() {
            tracing::debug!(job_id = %job_id, visit_index, "Visit already complete, skipping");
            return Ok(VisitOutcome::Done);
        }

        if cursor.position() > 0 {
            tracing::info!(
                job_id = %job_id,
                visit_index,
                resume_at = cursor.position(),
                "Resuming visit"
            );
        }

        let scope = ArtifactScope {
            job_id,
            store_id: &visit.store_id,
        };
        let mut checkpoint = VisitCheckpoint::resume(visit);

        for (image_index, image_url) in cursor.remaining(visit) {
            match self.processor.process(scope, image_url, cancel).await {
                Ok(image) => checkpoint.record(image),
                Err(ProcessError::Cancelled) => {
                    self.save_checkpoint(job_id, visit_index, &checkpoint).await?;
                    return Ok(VisitOutcome::Cancelled);
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        store_id = %visit.store_id,
                        image_index,
                        image_url = %image_url,
                        error = %e,
                        "Image processing failed"
                    );
                    // The status write matters more than the partial prefix.
                    if let Err(save_err) =
                        self.save_checkpoint(job_id, visit_index, &checkpoint).await
                    {
                        tracing::error!(job_id = %job_id, error = %save_err, "Dropping partial visit results");
                    }
                    return Ok(VisitOutcome::Failed(e.to_string()));
                }
            }
        }

        self.save_checkpoint(job_id, visit_index, &checkpoint).await?;
        Ok(VisitOutcome::Done)
    }

    async fn save_checkpoint(
        &self,
        job_id: Uuid,
        visit_index: usize,
        checkpoint: &VisitCheckpoint,
    ) -> Result<(), OrchestratorError> {
        if !checkpoint.advanced() {
            return Ok(());
        }

        self.writes
            .run("record visit results", job_id, || {
                self.store.set_visit_result(
                    job_id,
                    visit_index,
                    checkpoint.metrics(),
                    checkpoint.image_ids(),
                )
            })
            .await
            .map_err(|source| OrchestratorError::Checkpoint {
                job_id,
                visit_index,
                source,
            })?;

        tracing::debug!(
            job_id = %job_id,
            visit_index,
            recorded = checkpoint.recorded(),
            "Visit results recorded"
        );
        Ok(())
    }

    async fn finish(
        &self,
        job_id: Uuid,
        status: TerminalStatus,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.writes
            .run("set status", job_id, || self.store.set_status(job_id, &status))
            .await
            .map_err(|source| OrchestratorError::Status { job_id, source })?;

        Ok(match status {
            TerminalStatus::Completed => {
                metrics::counter!("store_visit_jobs_completed_total").increment(1);
                tracing::info!(job_id = %job_id, "Completed job");
                RunOutcome::Completed
            }
            TerminalStatus::Failed { store_id, error } => {
                metrics::counter!("store_visit_jobs_failed_total").increment(1);
                tracing::warn!(job_id = %job_id, store_id = %store_id, error = %error, "Failed job");
                RunOutcome::Failed { store_id, error }
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Failed to load job {job_id}: {source}")]
    Load {
        job_id: Uuid,
        #[source]
        source: StoreError,
    },

    #[error("Failed to record results for job {job_id} visit {visit_index}: {source}")]
    Checkpoint {
        job_id: Uuid,
        visit_index: usize,
        #[source]
        source: StoreError,
    },

    #[error("Failed to write status for job {job_id}: {source}")]
    Status {
        job_id: Uuid,
        #[source]
        source: StoreError,
    },
}
