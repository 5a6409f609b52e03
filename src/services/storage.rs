use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::R2Settings;
use crate::services::images::DecodedImage;

/// Where an artifact belongs: one job, one visited store.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactScope<'a> {
    pub job_id: Uuid,
    pub store_id: &'a str,
}

impl ArtifactScope<'_> {
    /// Object key / relative path for an artifact in this scope.
    pub fn key(&self, artifact_id: &str) -> String {
        format!("{}/{}/{}", self.job_id, self.store_id, artifact_id)
    }
}

/// Fresh artifact id of the form `<uuid>.<ext>`.
pub fn new_artifact_id(image: &DecodedImage) -> String {
    format!("{}.{}", Uuid::new_v4(), image.extension())
}

/// Persistent storage for processed images.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store the image and return its artifact id.
    async fn persist(
        &self,
        scope: ArtifactScope<'_>,
        image: &DecodedImage,
    ) -> Result<String, StorageError>;

    /// Delete an artifact that will not be recorded.
    async fn remove(
        &self,
        scope: ArtifactScope<'_>,
        artifact_id: &str,
    ) -> Result<(), StorageError>;
}

/// Writes artifacts beneath a local directory.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn persist(
        &self,
        scope: ArtifactScope<'_>,
        image: &DecodedImage,
    ) -> Result<String, StorageError> {
        if scope.store_id.is_empty() {
            return Err(StorageError::Config("store id must be provided".to_string()));
        }

        let dir = self
            .root
            .join(scope.job_id.to_string())
            .join(scope.store_id);
        tokio::fs::create_dir_all(&dir).await?;

        let artifact_id = new_artifact_id(image);
        let path = dir.join(&artifact_id);
        tokio::fs::write(&path, &image.encoded).await?;

        tracing::debug!(path = %path.display(), "Saved artifact");
        Ok(artifact_id)
    }

    async fn remove(
        &self,
        scope: ArtifactScope<'_>,
        artifact_id: &str,
    ) -> Result<(), StorageError> {
        let path = self.root.join(scope.key(artifact_id));
        tokio::fs::remove_file(&path).await?;
        tracing::debug!(path = %path.display(), "Removed artifact");
        Ok(())
    }
}

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2ArtifactStore {
    bucket: Box<Bucket>,
}

impl R2ArtifactStore {
    pub fn new(settings: &R2Settings<'_>) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: settings.endpoint.to_string(),
        };

        let credentials = Credentials::new(
            Some(settings.access_key),
            Some(settings.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(settings.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ArtifactStore for R2ArtifactStore {
    async fn persist(
        &self,
        scope: ArtifactScope<'_>,
        image: &DecodedImage,
    ) -> Result<String, StorageError> {
        let artifact_id = new_artifact_id(image);
        let key = scope.key(&artifact_id);

        self.bucket
            .put_object_with_content_type(&key, &image.encoded, image.content_type())
            .await
            .map_err(StorageError::S3)?;

        tracing::debug!(key = %key, "Uploaded artifact to R2");
        Ok(artifact_id)
    }

    async fn remove(
        &self,
        scope: ArtifactScope<'_>,
        artifact_id: &str,
    ) -> Result<(), StorageError> {
        let key = scope.key(artifact_id);
        self.bucket
            .delete_object(&key)
            .await
            .map_err(StorageError::S3)?;
        tracing::debug!(key = %key, "Deleted artifact from R2");
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to write artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
