use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{NewJob, VisitResult};

/// Body of `POST /api/submit`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[garde(range(min = 0))]
    pub count: i64,

    #[garde(length(min = 1), dive)]
    pub visits: Vec<VisitSubmission>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VisitSubmission {
    #[garde(length(min = 1))]
    pub store_id: String,

    #[garde(length(min = 1))]
    pub image_url: Vec<String>,

    #[garde(length(min = 1))]
    pub visit_time: String,
}

impl SubmitJobRequest {
    /// Validate the request and convert it into an insertable job.
    pub fn into_new_job(self) -> Result<NewJob, String> {
        self.validate().map_err(|report| report.to_string())?;

        if self.visits.len() as i64 != self.count {
            return Err(format!(
                "count ({}) does not match number of visits ({})",
                self.count,
                self.visits.len()
            ));
        }

        let visits = self
            .visits
            .into_iter()
            .map(|v| VisitResult::new(v.store_id, v.visit_time, v.image_url))
            .collect();

        Ok(NewJob {
            count: self.count,
            visits,
        })
    }
}

/// Response after a job is accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
}

/// Query string of `GET /api/status`.
#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub jobid: Option<String>,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: String,
    pub job_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub store_id: String,
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: serde_json::Value) -> SubmitJobRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_valid_submission_converts() {
        let req = parse(serde_json::json!({
            "count": 1,
            "visits": [{
                "store_id": "RP00001",
                "image_url": ["https://example.com/a.jpg", "https://example.com/b.jpg"],
                "visit_time": "2024-01-01T10:00:00Z"
            }]
        }));
        let job = req.into_new_job().unwrap();
        assert_eq!(job.count, 1);
        assert_eq!(job.visits[0].image_urls.len(), 2);
        assert!(job.visits[0].image_ids.is_empty());
        assert!(job.visits[0].metrics.is_empty());
    }

    #[test]
    fn test_count_mismatch_rejected() {
        let req = parse(serde_json::json!({
            "count": 2,
            "visits": [{"store_id": "RP00001", "image_url": ["u"], "visit_time": "t"}]
        }));
        let err = req.into_new_job().unwrap_err();
        assert!(err.contains("count"));
    }

    #[test]
    fn test_empty_visits_rejected() {
        let req = parse(serde_json::json!({"count": 0, "visits": []}));
        assert!(req.into_new_job().is_err());
    }

    #[test]
    fn test_negative_count_rejected() {
        let req = parse(serde_json::json!({
            "count": -1,
            "visits": [{"store_id": "RP00001", "image_url": ["u"], "visit_time": "t"}]
        }));
        assert!(req.into_new_job().is_err());
    }

    #[test]
    fn test_visit_fields_required() {
        let empty_store = parse(serde_json::json!({
            "count": 1,
            "visits": [{"store_id": "", "image_url": ["u"], "visit_time": "t"}]
        }));
        assert!(empty_store.into_new_job().is_err());

        let no_images = parse(serde_json::json!({
            "count": 1,
            "visits": [{"store_id": "RP00001", "image_url": [], "visit_time": "t"}]
        }));
        assert!(no_images.into_new_job().is_err());

        let no_time = parse(serde_json::json!({
            "count": 1,
            "visits": [{"store_id": "RP00001", "image_url": ["u"], "visit_time": ""}]
        }));
        assert!(no_time.into_new_job().is_err());
    }

    #[test]
    fn test_failed_status_response_shape() {
        let resp = JobStatusResponse {
            status: "failed".to_string(),
            job_id: Uuid::nil(),
            error: Some(JobFailure {
                store_id: "RP00001".to_string(),
                error: "boom".to_string(),
            }),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["store_id"], "RP00001");

        let ok = JobStatusResponse {
            status: "completed".to_string(),
            job_id: Uuid::nil(),
            error: None,
        };
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());
    }
}
