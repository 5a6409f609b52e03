use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

/// Lifecycle status of a store visit job.
///
/// A job is `Ongoing` from the moment it is accepted. `Completed` and
/// `Failed` are terminal and absorbing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Ongoing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Ongoing)
    }
}

/// The only statuses the orchestrator may write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Completed,
    Failed { store_id: String, error: String },
}

impl TerminalStatus {
    pub fn failed(store_id: impl Into<String>, error: impl Into<String>) -> Self {
        TerminalStatus::Failed {
            store_id: store_id.into(),
            error: error.into(),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            TerminalStatus::Completed => JobStatus::Completed,
            TerminalStatus::Failed { .. } => JobStatus::Failed,
        }
    }

    /// `(error, failed_store_id)` as stored; empty for `Completed`.
    pub fn error_fields(&self) -> (&str, &str) {
        match self {
            TerminalStatus::Completed => ("", ""),
            TerminalStatus::Failed { store_id, error } => (error, store_id),
        }
    }
}

/// One store's entry within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitResult {
    pub store_id: String,
    pub visit_time: String,
    pub image_urls: Vec<String>,
    /// Artifact ids of processed images, in source order.
    #[serde(default)]
    pub image_ids: Vec<String>,
    /// Scores aligned index-for-index with `image_ids`.
    #[serde(default)]
    pub metrics: Vec<i64>,
}

impl VisitResult {
    pub fn new(
        store_id: impl Into<String>,
        visit_time: impl Into<String>,
        image_urls: Vec<String>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            visit_time: visit_time.into(),
            image_urls,
            image_ids: Vec::new(),
            metrics: Vec::new(),
        }
    }
}

/// Checks the per-visit length invariants for a prospective result write.
pub fn check_visit_lengths(
    source_len: usize,
    image_ids: &[String],
    metrics: &[i64],
) -> Result<(), String> {
    if image_ids.len() != metrics.len() {
        return Err(format!(
            "image_ids ({}) and metrics ({}) differ in length",
            image_ids.len(),
            metrics.len()
        ));
    }
    if image_ids.len() > source_len {
        return Err(format!(
            "{} results recorded for {} source images",
            image_ids.len(),
            source_len
        ));
    }
    Ok(())
}

/// A store visit job document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreVisitJob {
    pub id: Uuid,
    pub status: JobStatus,
    pub error: String,
    pub failed_store_id: String,
    pub count: i64,
    pub visits: Vec<VisitResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields read by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusFields {
    pub status: JobStatus,
    pub error: String,
    pub failed_store_id: String,
}

/// A validated submission, ready to be inserted as an ongoing job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub count: i64,
    pub visits: Vec<VisitResult>,
}
