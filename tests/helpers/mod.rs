//! Test helpers: fake adapters and an orchestrator wired to them.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use retail_pulse::{
    engine::{orchestrator::JobOrchestrator, retry::WritePolicy, runner::JobRunner},
    models::job::{
        JobStatus, JobStatusFields, NewJob, StoreVisitJob, TerminalStatus, VisitResult,
    },
    services::{
        images::{DecodedImage, FetchError, ImageFetcher},
        job_store::{InMemoryJobStore, JobStore, StoreError},
        processor::{AreaScorer, ItemProcessor, LatencyInjector},
        storage::{ArtifactScope, ArtifactStore, LocalArtifactStore, StorageError},
        store_master::StoreMaster,
    },
};

/// Store ids every harness accepts.
pub const KNOWN_STORES: &[&str] = &["RP00001", "RP00002", "RP00003"];

/// Encode a blank PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode test PNG");
    out.into_inner()
}

pub fn url(name: &str) -> String {
    format!("http://images.test/{name}")
}

enum FakeResponse {
    Bytes(Vec<u8>),
    Status(u16),
    /// Never resolves; only cancellation ends the fetch.
    Hang,
}

/// Serves canned responses by URL and records every fetch.
///
/// URLs without a registered response answer with status 404.
#[derive(Default)]
pub struct FakeImageFetcher {
    responses: HashMap<String, FakeResponse>,
    calls: Mutex<Vec<String>>,
    cancel_on_call: Mutex<Option<(usize, CancellationToken)>>,
}

impl FakeImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_png(mut self, name: &str, width: u32, height: u32) -> Self {
        self.responses
            .insert(url(name), FakeResponse::Bytes(png_bytes(width, height)));
        self
    }

    pub fn with_bytes(mut self, name: &str, bytes: &[u8]) -> Self {
        self.responses
            .insert(url(name), FakeResponse::Bytes(bytes.to_vec()));
        self
    }

    pub fn with_status(mut self, name: &str, status: u16) -> Self {
        self.responses.insert(url(name), FakeResponse::Status(status));
        self
    }

    pub fn with_hang(mut self, name: &str) -> Self {
        self.responses.insert(url(name), FakeResponse::Hang);
        self
    }

    /// Cancel `token` during the `nth` fetch (1-based). Fires once.
    pub fn cancel_on_call(self, nth: usize, token: CancellationToken) -> Self {
        *self.cancel_on_call.lock() = Some((nth, token));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ImageFetcher for FakeImageFetcher {
    async fn fetch(&self, image_url: &str) -> Result<Vec<u8>, FetchError> {
        let call_number = {
            let mut calls = self.calls.lock();
            calls.push(image_url.to_string());
            calls.len()
        };

        {
            let mut trigger = self.cancel_on_call.lock();
            if matches!(trigger.as_ref(), Some((nth, _)) if *nth == call_number) {
                if let Some((_, token)) = trigger.take() {
                    token.cancel();
                }
            }
        }

        match self.responses.get(image_url) {
            Some(FakeResponse::Bytes(bytes)) => Ok(bytes.clone()),
            Some(FakeResponse::Status(code)) => Err(FetchError::Status(*code)),
            Some(FakeResponse::Hang) => std::future::pending().await,
            None => Err(FetchError::Status(404)),
        }
    }
}

/// Wraps a job store and fails a number of writes with a transient error.
pub struct FlakyJobStore {
    inner: InMemoryJobStore,
    visit_failures: AtomicU32,
    status_failures: AtomicU32,
}

impl FlakyJobStore {
    pub fn new(visit_failures: u32, status_failures: u32) -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            visit_failures: AtomicU32::new(visit_failures),
            status_failures: AtomicU32::new(status_failures),
        }
    }

    fn take_failure(counter: &AtomicU32) -> Result<(), StoreError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, StoreError> {
        self.inner.insert_job(job).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<StoreVisitJob>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<JobStatusFields>, StoreError> {
        self.inner.get_status(job_id).await
    }

    async fn set_status(&self, job_id: Uuid, status: &TerminalStatus) -> Result<(), StoreError> {
        Self::take_failure(&self.status_failures)?;
        self.inner.set_status(job_id, status).await
    }

    async fn set_visit_result(
        &self,
        job_id: Uuid,
        visit_index: usize,
        metrics: &[i64],
        image_ids: &[String],
    ) -> Result<(), StoreError> {
        Self::take_failure(&self.visit_failures)?;
        self.inner
            .set_visit_result(job_id, visit_index, metrics, image_ids)
            .await
    }

    async fn list_ongoing(&self) -> Result<Vec<Uuid>, StoreError> {
        self.inner.list_ongoing().await
    }

    async fn claim_job(
        &self,
        job_id: Uuid,
        owner: Uuid,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        self.inner.claim_job(job_id, owner, lease).await
    }

    async fn release_job(&self, job_id: Uuid, owner: Uuid) -> Result<(), StoreError> {
        self.inner.release_job(job_id, owner).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Local artifact store whose `nth` write (1-based) fails.
pub struct FailingArtifactStore {
    inner: LocalArtifactStore,
    fail_on: usize,
    writes: AtomicUsize,
}

impl FailingArtifactStore {
    pub fn new(root: &Path, fail_on: usize) -> Self {
        Self {
            inner: LocalArtifactStore::new(root),
            fail_on,
            writes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ArtifactStore for FailingArtifactStore {
    async fn persist(
        &self,
        scope: ArtifactScope<'_>,
        image: &DecodedImage,
    ) -> Result<String, StorageError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.inner.persist(scope, image).await
    }

    async fn remove(
        &self,
        scope: ArtifactScope<'_>,
        artifact_id: &str,
    ) -> Result<(), StorageError> {
        self.inner.remove(scope, artifact_id).await
    }
}

/// An orchestrator over fake adapters, with artifacts in a temp dir.
pub struct Harness {
    pub store: Arc<dyn JobStore>,
    pub fetcher: Arc<FakeImageFetcher>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub artifacts: TempDir,
}

impl Harness {
    pub fn new(fetcher: FakeImageFetcher) -> Self {
        Self::with_store(Arc::new(InMemoryJobStore::new()), fetcher, WritePolicy::once())
    }

    pub fn with_store(
        store: Arc<dyn JobStore>,
        fetcher: FakeImageFetcher,
        writes: WritePolicy,
    ) -> Self {
        Self::build(store, fetcher, writes, LatencyInjector::disabled(), |root| {
            Arc::new(LocalArtifactStore::new(root))
        })
    }

    pub fn with_latency(fetcher: FakeImageFetcher, latency: LatencyInjector) -> Self {
        Self::build(
            Arc::new(InMemoryJobStore::new()),
            fetcher,
            WritePolicy::once(),
            latency,
            |root| Arc::new(LocalArtifactStore::new(root)),
        )
    }

    /// Harness whose `nth` artifact write fails.
    pub fn with_artifact_failure(fetcher: FakeImageFetcher, nth: usize) -> Self {
        Self::build(
            Arc::new(InMemoryJobStore::new()),
            fetcher,
            WritePolicy::once(),
            LatencyInjector::disabled(),
            |root| Arc::new(FailingArtifactStore::new(root, nth)),
        )
    }

    fn build(
        store: Arc<dyn JobStore>,
        fetcher: FakeImageFetcher,
        writes: WritePolicy,
        latency: LatencyInjector,
        artifact_store: impl FnOnce(&Path) -> Arc<dyn ArtifactStore>,
    ) -> Self {
        let artifacts = tempfile::tempdir().expect("Failed to create artifact dir");
        let fetcher = Arc::new(fetcher);
        let processor = Arc::new(ItemProcessor::new(
            fetcher.clone(),
            artifact_store(artifacts.path()),
            Arc::new(AreaScorer),
            latency,
        ));
        let store_master: StoreMaster = KNOWN_STORES.iter().copied().collect();
        let orchestrator = Arc::new(JobOrchestrator::new(
            Arc::clone(&store),
            Arc::new(store_master),
            processor,
            writes,
        ));

        Self {
            store,
            fetcher,
            orchestrator,
            artifacts,
        }
    }

    pub fn runner(&self, max_concurrent_jobs: usize) -> Arc<JobRunner> {
        Arc::new(JobRunner::new(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.store),
            max_concurrent_jobs,
        ))
    }

    pub async fn insert(&self, visits: Vec<VisitResult>) -> Uuid {
        let job = NewJob {
            count: visits.len() as i64,
            visits,
        };
        self.store.insert_job(&job).await.expect("Failed to insert job")
    }

    pub async fn job(&self, job_id: Uuid) -> StoreVisitJob {
        self.store
            .get_job(job_id)
            .await
            .expect("Failed to load job")
            .expect("Job missing")
    }

    /// Files written for one visited store of a job.
    pub fn artifact_count(&self, job_id: Uuid, store_id: &str) -> usize {
        let dir = self.artifacts.path().join(job_id.to_string()).join(store_id);
        match std::fs::read_dir(&dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

pub fn visit(store_id: &str, images: &[&str]) -> VisitResult {
    VisitResult::new(
        store_id,
        "2024-01-01T10:00:00",
        images.iter().map(|name| url(name)).collect(),
    )
}

/// Length invariants that must hold after any write.
pub fn assert_visit_invariants(job: &StoreVisitJob) {
    for (index, visit) in job.visits.iter().enumerate() {
        assert_eq!(
            visit.image_ids.len(),
            visit.metrics.len(),
            "visit {index} has misaligned results"
        );
        assert!(
            visit.image_ids.len() <= visit.image_urls.len(),
            "visit {index} has more results than images"
        );
    }
}

/// Poll until the job leaves the ongoing state.
pub async fn wait_for_terminal(store: &dyn JobStore, job_id: Uuid) -> JobStatusFields {
    for _ in 0..200 {
        let fields = store
            .get_status(job_id)
            .await
            .expect("Failed to read status")
            .expect("Job missing");
        if fields.status != JobStatus::Ongoing {
            return fields;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish in time");
}
