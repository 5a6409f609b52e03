use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8080"). Unused by the worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Jobs are kept in memory when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Redis connection string. When set, the API enqueues jobs for the worker.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// CSV file listing valid store identifiers.
    #[serde(default = "default_store_master_path")]
    pub store_master_path: PathBuf,

    /// Root directory for locally stored artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// R2 bucket name; with the three fields below, selects R2 artifact storage.
    #[serde(default)]
    pub r2_bucket: Option<String>,

    #[serde(default)]
    pub r2_endpoint: Option<String>,

    #[serde(default)]
    pub r2_access_key: Option<String>,

    #[serde(default)]
    pub r2_secret_key: Option<String>,

    /// Upper bound on jobs running at once. 0 means unbounded.
    #[serde(default)]
    pub max_concurrent_jobs: usize,

    #[serde(default = "default_delay_min_ms")]
    pub processing_delay_min_ms: u64,

    #[serde(default = "default_delay_max_ms")]
    pub processing_delay_max_ms: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_store_write_attempts")]
    pub store_write_attempts: u32,

    #[serde(default = "default_store_write_backoff_ms")]
    pub store_write_backoff_ms: u64,

    /// How long a runner's claim on a job lasts without renewal.
    #[serde(default = "default_job_lease_secs")]
    pub job_lease_secs: u64,
}

/// Credentials for an S3-compatible artifact bucket.
#[derive(Debug, Clone)]
pub struct R2Settings<'a> {
    pub bucket: &'a str,
    pub endpoint: &'a str,
    pub access_key: &'a str,
    pub secret_key: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_store_master_path() -> PathBuf {
    PathBuf::from("StoreMasterAssignment.csv")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("./files")
}

fn default_delay_min_ms() -> u64 {
    100
}

fn default_delay_max_ms() -> u64 {
    400
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_store_write_attempts() -> u32 {
    5
}

fn default_store_write_backoff_ms() -> u64 {
    200
}

fn default_job_lease_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: AppConfig = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processing_delay_min_ms > self.processing_delay_max_ms {
            return Err(ConfigError::Invalid(format!(
                "processing_delay_min_ms ({}) exceeds processing_delay_max_ms ({})",
                self.processing_delay_min_ms, self.processing_delay_max_ms
            )));
        }
        if self.store_write_attempts == 0 {
            return Err(ConfigError::Invalid(
                "store_write_attempts must be at least 1".to_string(),
            ));
        }
        if self.job_lease_secs == 0 {
            return Err(ConfigError::Invalid(
                "job_lease_secs must be at least 1".to_string(),
            ));
        }
        // The API and the worker only see the same jobs through Postgres.
        if self.redis_url.is_some() && self.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "REDIS_URL requires DATABASE_URL so the API and worker share one job store"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// R2 settings, only when all four values are present.
    pub fn r2(&self) -> Option<R2Settings<'_>> {
        Some(R2Settings {
            bucket: self.r2_bucket.as_deref()?,
            endpoint: self.r2_endpoint.as_deref()?,
            access_key: self.r2_access_key.as_deref()?,
            secret_key: self.r2_secret_key.as_deref()?,
        })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn store_write_backoff(&self) -> Duration {
        Duration::from_millis(self.store_write_backoff_ms)
    }

    pub fn job_lease(&self) -> Duration {
        Duration::from_secs(self.job_lease_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<AppConfig, envy::Error> {
        envy::from_iter(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        )
    }

    #[test]
    fn test_defaults_apply() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.max_concurrent_jobs, 0);
        assert_eq!(config.processing_delay_min_ms, 100);
        assert_eq!(config.processing_delay_max_ms, 400);
        assert!(config.database_url.is_none());
        assert!(config.r2().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_r2_requires_all_fields() {
        let partial = from_pairs(&[("R2_BUCKET", "b"), ("R2_ENDPOINT", "https://r2")]).unwrap();
        assert!(partial.r2().is_none());

        let full = from_pairs(&[
            ("R2_BUCKET", "b"),
            ("R2_ENDPOINT", "https://r2"),
            ("R2_ACCESS_KEY", "ak"),
            ("R2_SECRET_KEY", "sk"),
        ])
        .unwrap();
        assert_eq!(full.r2().unwrap().bucket, "b");
    }

    #[test]
    fn test_inverted_delay_bounds_rejected() {
        let config = from_pairs(&[
            ("PROCESSING_DELAY_MIN_MS", "500"),
            ("PROCESSING_DELAY_MAX_MS", "100"),
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_write_attempts_rejected() {
        let config = from_pairs(&[("STORE_WRITE_ATTEMPTS", "0")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_without_database_rejected() {
        let config = from_pairs(&[("REDIS_URL", "redis://127.0.0.1/")]).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let shared = from_pairs(&[
            ("REDIS_URL", "redis://127.0.0.1/"),
            ("DATABASE_URL", "postgres://localhost/retail_pulse"),
        ])
        .unwrap();
        assert!(shared.validate().is_ok());
    }

    #[test]
    fn test_zero_job_lease_rejected() {
        let config = from_pairs(&[("JOB_LEASE_SECS", "0")]).unwrap();
        assert!(config.validate().is_err());
        assert_eq!(from_pairs(&[]).unwrap().job_lease().as_secs(), 30);
    }
}
