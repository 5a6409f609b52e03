//! Resume cursor: the count of durably recorded results for a visit.
//!
//! Results are appended strictly in source order and only after an image
//! fully succeeds, so the count is an exact checkpoint. It is the only
//! mechanism used to skip work when a job is run again.

use crate::models::job::{check_visit_lengths, VisitResult};
use crate::services::processor::ProcessedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeCursor {
    position: usize,
    total: usize,
}

impl ResumeCursor {
    /// Cursor for a visit as loaded from the store.
    ///
    /// Fails if the stored results break the length invariants.
    pub fn for_visit(visit: &VisitResult) -> Result<Self, String> {
        check_visit_lengths(visit.image_urls.len(), &visit.image_ids, &visit.metrics)?;
        Ok(Self {
            position: visit.image_ids.len(),
            total: visit.image_urls.len(),
        })
    }

    /// Index of the first image not yet processed.
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_complete(&self) -> bool {
        self.position >= self.total
    }

    /// Source images still to process, with their indices.
    pub fn remaining<'a>(&self, visit: &'a VisitResult) -> impl Iterator<Item = (usize, &'a str)> {
        visit
            .image_urls
            .iter()
            .enumerate()
            .skip(self.position)
            .map(|(i, url)| (i, url.as_str()))
    }
}

/// Results for one visit accumulated during a run.
#[derive(Debug, Clone)]
pub struct VisitCheckpoint {
    image_ids: Vec<String>,
    metrics: Vec<i64>,
    resumed_at: usize,
}

impl VisitCheckpoint {
    /// Start from what the store already holds for the visit.
    pub fn resume(visit: &VisitResult) -> Self {
        Self {
            image_ids: visit.image_ids.clone(),
            metrics: visit.metrics.clone(),
            resumed_at: visit.image_ids.len(),
        }
    }

    pub fn record(&mut self, image: ProcessedImage) {
        self.image_ids.push(image.artifact_id);
        self.metrics.push(image.metric);
    }

    /// Whether this run recorded anything new.
    pub fn advanced(&self) -> bool {
        self.image_ids.len() > self.resumed_at
    }

    /// Images recorded for the visit, including the resumed prefix.
    pub fn recorded(&self) -> usize {
        self.image_ids.len()
    }

    pub fn image_ids(&self) -> &[String] {
        &self.image_ids
    }

    pub fn metrics(&self) -> &[i64] {
        &self.metrics
    }
}
