use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobStatus;
use crate::models::submission::{
    JobFailure, JobStatusResponse, StatusQuery, SubmitJobRequest, SubmitJobResponse,
};
use crate::routes::ApiError;

/// POST /api/submit: accept a batch of store visits as a new job.
pub async fn submit_job(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        tracing::debug!(error = %rejection, "Rejected submission body");
        ApiError::BadRequest("JSON decoding error".to_string())
    })?;

    let new_job = request.into_new_job().map_err(ApiError::BadRequest)?;
    let job_id = state.jobs.insert_job(&new_job).await?;

    metrics::counter!("store_visit_jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %job_id,
        visits = new_job.visits.len(),
        "Accepted store visit job"
    );

    // The job is already stored as ongoing; a failed hand-off is picked up
    // by the resume sweep on the next start.
    if let Err(e) = state.dispatcher.dispatch(job_id).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to dispatch job");
    }

    Ok((StatusCode::CREATED, Json(SubmitJobResponse { job_id })))
}

/// GET /api/status?jobid=: report a job's status and failure details.
pub async fn get_job_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let raw = query
        .jobid
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::BadRequest("jobid is a required field".to_string()))?;

    let job_id =
        Uuid::parse_str(&raw).map_err(|_| ApiError::BadRequest("invalid jobid".to_string()))?;

    let fields = state
        .jobs
        .get_status(job_id)
        .await?
        .ok_or_else(|| ApiError::BadRequest("jobid does not exist".to_string()))?;

    let error = (fields.status == JobStatus::Failed).then(|| JobFailure {
        store_id: fields.failed_store_id,
        error: fields.error,
    });

    Ok(Json(JobStatusResponse {
        status: fields.status.to_string(),
        job_id,
        error,
    }))
}
