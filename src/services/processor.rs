use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::services::images::{self, DecodeError, FetchError, ImageFetcher};
use crate::services::storage::{ArtifactScope, ArtifactStore, StorageError};

/// Turns image dimensions into the score recorded for an image.
pub trait Scorer: Send + Sync {
    fn score(&self, width: u32, height: u32) -> i64;
}

/// Scores an image by its pixel area.
#[derive(Debug, Clone, Copy, Default)]
pub struct AreaScorer;

impl Scorer for AreaScorer {
    fn score(&self, width: u32, height: u32) -> i64 {
        i64::from(width) * i64::from(height)
    }
}

/// Random per-image pause standing in for a heavier compute step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyInjector {
    min: Duration,
    max: Duration,
}

impl LatencyInjector {
    /// `min_ms` must not exceed `max_ms`; both zero disables the pause.
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min: Duration::from_millis(min_ms.min(max_ms)),
            max: Duration::from_millis(max_ms),
        }
    }

    pub fn disabled() -> Self {
        Self::new(0, 0)
    }

    pub fn is_disabled(&self) -> bool {
        self.max.is_zero()
    }

    fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }

    /// Sleep for a random duration within bounds. Returns `false` if cancelled.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        if self.is_disabled() {
            return !cancel.is_cancelled();
        }
        let delay = self.sample();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Output of one successfully processed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage {
    pub artifact_id: String,
    pub metric: i64,
}

/// Fetches, stores and scores a single image.
///
/// Has no effect on the job document; recording results is the
/// orchestrator's job.
pub struct ItemProcessor {
    fetcher: Arc<dyn ImageFetcher>,
    artifacts: Arc<dyn ArtifactStore>,
    scorer: Arc<dyn Scorer>,
    latency: LatencyInjector,
}

impl ItemProcessor {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        artifacts: Arc<dyn ArtifactStore>,
        scorer: Arc<dyn Scorer>,
        latency: LatencyInjector,
    ) -> Self {
        Self {
            fetcher,
            artifacts,
            scorer,
            latency,
        }
    }

    pub async fn process(
        &self,
        scope: ArtifactScope<'_>,
        image_url: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessedImage, ProcessError> {
        let start = Instant::now();

        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
            fetched = self.fetcher.fetch(image_url) => fetched?,
        };

        let decoded = tokio::task::spawn_blocking(move || images::decode(&raw))
            .await
            .map_err(|e| ProcessError::Task(e.to_string()))??;

        let artifact_id = self.artifacts.persist(scope, &decoded).await?;
        let metric = self.scorer.score(decoded.width, decoded.height);

        if !self.latency.pause(cancel).await {
            // Never recorded, so nothing else would reference it.
            if let Err(e) = self.artifacts.remove(scope, &artifact_id).await {
                tracing::warn!(
                    job_id = %scope.job_id,
                    artifact_id = %artifact_id,
                    error = %e,
                    "Failed to remove unrecorded artifact"
                );
            }
            return Err(ProcessError::Cancelled);
        }

        metrics::counter!("store_visit_images_processed_total").increment(1);
        metrics::histogram!("store_visit_image_processing_seconds")
            .record(start.elapsed().as_secs_f64());

        tracing::debug!(
            job_id = %scope.job_id,
            store_id = %scope.store_id,
            image_url = %image_url,
            artifact_id = %artifact_id,
            width = decoded.width,
            height = decoded.height,
            metric,
            "Processed image"
        );

        Ok(ProcessedImage {
            artifact_id,
            metric,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("image processing task failed: {0}")]
    Task(String),

    #[error("processing cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_scorer() {
        assert_eq!(AreaScorer.score(10, 20), 200);
        assert_eq!(AreaScorer.score(0, 20), 0);
        assert_eq!(AreaScorer.score(u32::MAX, 2), 2 * i64::from(u32::MAX));
    }

    #[test]
    fn test_latency_sample_within_bounds() {
        let latency = LatencyInjector::new(5, 10);
        for _ in 0..100 {
            let d = latency.sample();
            assert!(d >= Duration::from_millis(5) && d <= Duration::from_millis(10));
        }
    }

    #[test]
    fn test_inverted_bounds_clamp_to_max() {
        let latency = LatencyInjector::new(50, 10);
        assert_eq!(latency.sample(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_disabled_latency_returns_immediately() {
        let cancel = CancellationToken::new();
        assert!(LatencyInjector::disabled().pause(&cancel).await);
        cancel.cancel();
        assert!(!LatencyInjector::disabled().pause(&cancel).await);
    }

    #[tokio::test]
    async fn test_pause_observes_cancellation() {
        let cancel = CancellationToken::new();
        let latency = LatencyInjector::new(60_000, 60_000);
        let child = cancel.clone();
        let handle = tokio::spawn(async move { latency.pause(&child).await });
        cancel.cancel();
        assert!(!handle.await.unwrap());
    }
}
