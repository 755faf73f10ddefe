//! Job repository for PostgreSQL.
//!
//! Implements the [`JobStore`] trait. Every operation is a single statement,
//! so no transaction is ever held open across a remote call. Terminal
//! writes are guarded with `WHERE status = 'RUNNING'`: once a job has left
//! RUNNING it is never written again.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use tracing::warn;
use uuid::Uuid;

use pulse_core::error::AppError;
use pulse_core::job::{JobStatus, JobType, SyncJob};
use pulse_core::traits::JobStore;

const JOB_COLUMNS: &str = "id, tenant_id, job_type, status, correlation_id, records_fetched, records_saved, error_message, started_at, completed_at";

/// PostgreSQL implementation of the job store.
#[derive(Clone)]
pub struct JobRepository {
    pool: Pool<Postgres>,
}

impl JobRepository {
    /// Create a new job repository with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Moves a RUNNING job to `status`. Returns false if the job was not
    /// RUNNING (or does not exist), in which case nothing is written.
    async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        records_fetched: usize,
        records_saved: usize,
        error_message: Option<&str>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sync_jobs
            SET
                status = $2,
                records_fetched = $3,
                records_saved = $4,
                error_message = $5,
                completed_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(saturating_i32(records_fetched))
        .bind(saturating_i32(records_saved))
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if !applied {
            warn!(%job_id, %status, "Job is not RUNNING, terminal write ignored");
        }
        Ok(applied)
    }
}

fn saturating_i32(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

// =============================================================================
// Helper Types for Database Mapping
// =============================================================================

/// Helper struct for deserializing job rows from the database.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    tenant_id: i64,
    job_type: String,
    status: String,
    correlation_id: String,
    records_fetched: i32,
    records_saved: i32,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for SyncJob {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type = row
            .job_type
            .parse()
            .map_err(|e| AppError::Generic(format!("job {}: {}", row.id, e)))?;
        let status = row
            .status
            .parse()
            .map_err(|e| AppError::Generic(format!("job {}: {}", row.id, e)))?;

        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            job_type,
            status,
            correlation_id: row.correlation_id,
            records_fetched: row.records_fetched,
            records_saved: row.records_saved,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

// =============================================================================
// JobStore Trait Implementation
// =============================================================================

impl JobStore for JobRepository {
    async fn create_job(
        &self,
        tenant_id: i64,
        job_type: JobType,
        correlation_id: &str,
    ) -> Result<SyncJob, AppError> {
        let query = format!(
            r#"
            INSERT INTO sync_jobs (tenant_id, job_type, status, correlation_id)
            VALUES ($1, $2, 'RUNNING', $3)
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let row: JobRow = sqlx::query_as(&query)
            .bind(tenant_id)
            .bind(job_type.as_str())
            .bind(correlation_id)
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        records_fetched: usize,
        records_saved: usize,
    ) -> Result<(), AppError> {
        self.finish(
            job_id,
            JobStatus::Completed,
            records_fetched,
            records_saved,
            None,
        )
        .await?;
        Ok(())
    }

    async fn mark_partial_failure(
        &self,
        job_id: Uuid,
        records_fetched: usize,
        records_saved: usize,
        reason: &str,
    ) -> Result<(), AppError> {
        self.finish(
            job_id,
            JobStatus::PartialFailure,
            records_fetched,
            records_saved,
            Some(reason),
        )
        .await?;
        Ok(())
    }

    async fn fail_job(&self, job_id: Uuid, error: &str) -> Result<(), AppError> {
        self.finish(job_id, JobStatus::Failed, 0, 0, Some(error))
            .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<SyncJob>, AppError> {
        let query = format!("SELECT {} FROM sync_jobs WHERE id = $1", JOB_COLUMNS);
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncJob::try_from).transpose()
    }

    async fn list_recent_jobs(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SyncJob>, AppError> {
        let query = format!(
            "SELECT {} FROM sync_jobs WHERE started_at >= $1 ORDER BY started_at DESC LIMIT $2",
            JOB_COLUMNS
        );
        let rows: Vec<JobRow> = sqlx::query_as(&query)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SyncJob::try_from).collect()
    }

    async fn count_recent_failures(&self, since: DateTime<Utc>) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sync_jobs WHERE status = 'FAILED' AND started_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.0)
    }

    async fn last_successful_sync(
        &self,
        tenant_id: i64,
        job_type: JobType,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let last: (Option<DateTime<Utc>>,) = sqlx::query_as(
            r#"
            SELECT MAX(completed_at)
            FROM sync_jobs
            WHERE tenant_id = $1 AND job_type = $2 AND status = 'COMPLETED'
            "#,
        )
        .bind(tenant_id)
        .bind(job_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(last.0)
    }
}
