//! PostgreSQL persistence for store visit jobs.

use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub mod queries;

pub use queries::PgJobStore;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Connections kept beyond the per-job allowance for API traffic.
const BASE_CONNECTIONS: u32 = 10;
const MAX_CONNECTIONS: u32 = 50;

/// Pool size for a process running up to `max_concurrent_jobs` jobs.
/// Unbounded runners (0) get the maximum.
pub fn pool_size(max_concurrent_jobs: usize) -> u32 {
    match max_concurrent_jobs {
        0 => MAX_CONNECTIONS,
        n => u32::try_from(n)
            .unwrap_or(u32::MAX)
            .saturating_add(BASE_CONNECTIONS)
            .min(MAX_CONNECTIONS),
    }
}

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
    tracing::info!(migrations = MIGRATOR.iter().count(), "Database schema up to date");
    Ok(())
}
