use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{
    check_visit_lengths, JobStatus, JobStatusFields, NewJob, StoreVisitJob, TerminalStatus,
    VisitResult,
};
use crate::services::job_store::{validate_terminal_status, JobStore, StoreError};

/// Job store backed by PostgreSQL.
///
/// Jobs live in `store_visit_jobs`, one row per visit in `store_visits`.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_status(raw: &str) -> Result<JobStatus, StoreError> {
        JobStatus::from_str(raw).map_err(|_| StoreError::Corrupt(format!("unknown status {raw:?}")))
    }

    fn status_fields(row: &PgRow) -> Result<JobStatusFields, StoreError> {
        let status: String = row.try_get("status")?;
        Ok(JobStatusFields {
            status: Self::parse_status(&status)?,
            error: row.try_get("error")?,
            failed_store_id: row.try_get("failed_store_id")?,
        })
    }

    /// Explain why a conditional status update touched no rows.
    async fn diagnose_no_update(&self, job_id: Uuid) -> Result<StoreError, StoreError> {
        match self.get_status(job_id).await? {
            Some(fields) if fields.status.is_terminal() => Ok(StoreError::JobFinalized(job_id)),
            _ => Ok(StoreError::NotFound(job_id)),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_job(&self, job: &NewJob) -> Result<Uuid, StoreError> {
        let job_id = Uuid::new_v4();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO store_visit_jobs (id, status, count)
            VALUES ($1, 'ongoing', $2)
            "#,
        )
        .bind(job_id)
        .bind(job.count)
        .execute(&mut *tx)
        .await?;

        for (visit_index, visit) in job.visits.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO store_visits (job_id, visit_index, store_id, visit_time, image_urls)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(job_id)
            .bind(visit_index as i32)
            .bind(&visit.store_id)
            .bind(&visit.visit_time)
            .bind(&visit.image_urls)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(job_id)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<StoreVisitJob>, StoreError> {
        let Some(row) = sqlx::query(
            r#"
            SELECT id, status, error, failed_store_id, count, created_at, updated_at
            FROM store_visit_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let visit_rows = sqlx::query(
            r#"
            SELECT store_id, visit_time, image_urls, image_ids, metrics
            FROM store_visits
            WHERE job_id = $1
            ORDER BY visit_index
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        let visits = visit_rows
            .iter()
            .map(|r| {
                Ok(VisitResult {
                    store_id: r.try_get("store_id")?,
                    visit_time: r.try_get("visit_time")?,
                    image_urls: r.try_get("image_urls")?,
                    image_ids: r.try_get("image_ids")?,
                    metrics: r.try_get("metrics")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let fields = Self::status_fields(&row)?;

        Ok(Some(StoreVisitJob {
            id: row.try_get("id")?,
            status: fields.status,
            error: fields.error,
            failed_store_id: fields.failed_store_id,
            count: row.try_get("count")?,
            visits,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }

    async fn get_status(&self, job_id: Uuid) -> Result<Option<JobStatusFields>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status, error, failed_store_id
            FROM store_visit_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::status_fields).transpose()
    }

    async fn set_status(&self, job_id: Uuid, status: &TerminalStatus) -> Result<(), StoreError> {
        validate_terminal_status(status)?;
        let (error, failed_store_id) = status.error_fields();

        let result = sqlx::query(
            r#"
            UPDATE store_visit_jobs
            SET status = $1,
                error = $2,
                failed_store_id = $3,
                updated_at = NOW()
            WHERE id = $4 AND status = 'ongoing'
            "#,
        )
        .bind(status.status().as_ref())
        .bind(error)
        .bind(failed_store_id)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.diagnose_no_update(job_id).await?);
        }
        Ok(())
    }

    async fn set_visit_result(
        &self,
        job_id: Uuid,
        visit_index: usize,
        metrics: &[i64],
        image_ids: &[String],
    ) -> Result<(), StoreError> {
        let row = sqlx::query(
            r#"
            SELECT j.status, cardinality(v.image_urls) AS source_len
            FROM store_visit_jobs j
            LEFT JOIN store_visits v ON v.job_id = j.id AND v.visit_index = $2
            WHERE j.id = $1
            "#,
        )
        .bind(job_id)
        .bind(visit_index as i32)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(job_id))?;

        let status: String = row.try_get("status")?;
        if Self::parse_status(&status)?.is_terminal() {
            return Err(StoreError::JobFinalized(job_id));
        }
        let source_len: Option<i32> = row.try_get("source_len")?;
        let source_len = source_len.ok_or(StoreError::VisitOutOfRange {
            job_id,
            visit_index,
        })?;
        check_visit_lengths(source_len as usize, image_ids, metrics)
            .map_err(StoreError::InvariantViolation)?;

        let result = sqlx::query(
            r#"
            UPDATE store_visits v
            SET image_ids = $3,
                metrics = $4
            FROM store_visit_jobs j
            WHERE v.job_id = $1
              AND v.visit_index = $2
              AND j.id = v.job_id
              AND j.status = 'ongoing'
            "#,
        )
        .bind(job_id)
        .bind(visit_index as i32)
        .bind(image_ids)
        .bind(metrics)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::JobFinalized(job_id));
        }

        sqlx::query("UPDATE store_visit_jobs SET updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_ongoing(&self) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM store_visit_jobs
            WHERE status = 'ongoing'
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| r.try_get("id").map_err(StoreError::from))
            .collect()
    }

    async fn claim_job(
        &self,
        job_id: Uuid,
        owner: Uuid,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let claimed = sqlx::query(
            r#"
            UPDATE store_visit_jobs
            SET claimed_by = $2,
                lease_until = NOW() + make_interval(secs => $3)
            WHERE id = $1
              AND status = 'ongoing'
              AND (claimed_by IS NULL OR claimed_by = $2 OR lease_until < NOW())
            RETURNING id
            "#,
        )
        .bind(job_id)
        .bind(owner)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn release_job(&self, job_id: Uuid, owner: Uuid) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE store_visit_jobs
            SET claimed_by = NULL,
                lease_until = NULL
            WHERE id = $1 AND claimed_by = $2
            "#,
        )
        .bind(job_id)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
