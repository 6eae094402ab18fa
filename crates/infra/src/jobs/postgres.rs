//! Postgres-backed retry job store (feature `postgres`).
//!
//! Expects a `bulk_retry_jobs` table with one column per [`RetryJob`] field
//! (`descriptor` as `JSONB`, ids as `UUID`, timestamps as `TIMESTAMPTZ`,
//! `status` as `TEXT`). Provisioning the table is left to migrations.
//!
//! ## Status guard
//!
//! `try_claim` and `finish` are single conditional `UPDATE ... WHERE status = ...
//! RETURNING` statements, so the database decides which of two concurrent
//! runners wins a claim.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `AlreadyExists` |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / other | N/A | `Storage` |

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use bulkdml_core::{OperationDescriptor, RetryJobId};

use super::store::{JobStats, JobStoreError, RetryJobStore};
use super::types::{JobFinish, RetryJob, RetryJobStatus};

const COLUMNS: &str = "id, descriptor, entity_type, serialized_records, record_count, \
    retries_left, attempt, base_delay_ms, status, error_message, error_detail, \
    predecessor_id, successor_id, created_at, updated_at, scheduled_for";

/// Postgres-backed retry job store.
///
/// The [`RetryJobStore`] trait is synchronous; calls are driven on the runtime
/// whose handle was given at construction. Synchronous calls made from inside
/// an async context fail with `JobStoreError::Storage`; async callers use the
/// `*_job` methods directly.
#[derive(Debug, Clone)]
pub struct PostgresRetryJobStore {
    pool: Arc<PgPool>,
    runtime: Handle,
}

impl PostgresRetryJobStore {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime,
        }
    }

    /// Bind to the runtime the caller is currently running on.
    pub fn from_current(pool: PgPool) -> Result<Self, JobStoreError> {
        let runtime = Handle::try_current().map_err(|_| {
            JobStoreError::Storage("PostgresRetryJobStore must be created inside a tokio runtime".to_string())
        })?;
        Ok(Self::new(pool, runtime))
    }

    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    pub async fn insert_job(&self, job: &RetryJob) -> Result<RetryJobId, JobStoreError> {
        let descriptor = serde_json::to_value(&job.descriptor)
            .map_err(|e| JobStoreError::Storage(format!("failed to encode descriptor: {e}")))?;

        sqlx::query(&format!(
            "INSERT INTO bulk_retry_jobs ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(job.id.as_uuid())
        .bind(descriptor)
        .bind(&job.entity_type)
        .bind(&job.serialized_records)
        .bind(job.record_count as i64)
        .bind(job.retries_left as i32)
        .bind(job.attempt as i32)
        .bind(i64::try_from(job.base_delay_ms).unwrap_or(i64::MAX))
        .bind(job.status.as_str())
        .bind(&job.error_message)
        .bind(&job.error_detail)
        .bind(job.predecessor_id.map(|id| *id.as_uuid()))
        .bind(job.successor_id.map(|id| *id.as_uuid()))
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.scheduled_for)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::AlreadyExists(job.id)
            } else {
                map_sqlx_error("insert_job", e)
            }
        })?;

        Ok(job.id)
    }

    pub async fn load_job(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM bulk_retry_jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_job", e))?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    pub async fn delete_pending_job(&self, id: RetryJobId) -> Result<bool, JobStoreError> {
        let result = sqlx::query("DELETE FROM bulk_retry_jobs WHERE id = $1 AND status = 'pending'")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_pending_job", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn claim_job(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE bulk_retry_jobs SET status = 'running', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING {COLUMNS}"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_job", e))?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    #[instrument(skip(self, finish), fields(job_id = %id), err)]
    pub async fn finish_job(&self, id: RetryJobId, finish: JobFinish) -> Result<RetryJob, JobStoreError> {
        let to = finish.status();
        let (successor, error_message, error_detail) = match finish {
            JobFinish::Completed => (None, None, None),
            JobFinish::Superseded {
                successor,
                error_message,
            } => (Some(*successor.as_uuid()), Some(error_message), None),
            JobFinish::Failed {
                error_message,
                error_detail,
            } => (None, Some(error_message), error_detail),
        };

        let row = sqlx::query(&format!(
            "UPDATE bulk_retry_jobs SET status = $2, \
                 successor_id = COALESCE($3, successor_id), \
                 error_message = COALESCE($4, error_message), \
                 error_detail = COALESCE($5, error_detail), \
                 updated_at = NOW() \
             WHERE id = $1 AND status = 'running' RETURNING {COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(to.as_str())
        .bind(successor)
        .bind(error_message)
        .bind(error_detail)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("finish_job", e))?;

        match row {
            Some(row) => job_from_row(&row),
            None => match self.load_job(id).await? {
                Some(job) => Err(JobStoreError::InvalidTransition {
                    id,
                    from: job.status,
                    to,
                }),
                None => Err(JobStoreError::NotFound(id)),
            },
        }
    }

    pub async fn list_jobs(
        &self,
        status: Option<RetryJobStatus>,
        limit: usize,
    ) -> Result<Vec<RetryJob>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM bulk_retry_jobs \
             WHERE ($1::text IS NULL OR status = $1) \
             ORDER BY created_at ASC, id ASC LIMIT $2"
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_jobs", e))?;

        rows.iter().map(job_from_row).collect()
    }

    pub async fn job_stats(&self) -> Result<JobStats, JobStoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS total, COUNT(successor_id) AS superseded \
             FROM bulk_retry_jobs GROUP BY status",
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("job_stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| read_error("status", e))?;
            let total: i64 = row.try_get("total").map_err(|e| read_error("total", e))?;
            let superseded: i64 = row
                .try_get("superseded")
                .map_err(|e| read_error("superseded", e))?;
            let total = total.max(0) as usize;
            match status.parse::<RetryJobStatus>().map_err(JobStoreError::Storage)? {
                RetryJobStatus::Pending => stats.pending += total,
                RetryJobStatus::Running => stats.running += total,
                RetryJobStatus::Completed => stats.completed += total,
                RetryJobStatus::Failed => {
                    stats.failed += total;
                    stats.superseded += superseded.max(0) as usize;
                }
            }
        }
        Ok(stats)
    }

    fn block_on<F, T>(&self, fut: F) -> Result<T, JobStoreError>
    where
        F: std::future::Future<Output = Result<T, JobStoreError>>,
    {
        if Handle::try_current().is_ok() {
            return Err(JobStoreError::Storage(
                "synchronous job store call from an async context; use the async methods".to_string(),
            ));
        }
        self.runtime.block_on(fut)
    }
}

impl RetryJobStore for PostgresRetryJobStore {
    fn insert(&self, job: RetryJob) -> Result<RetryJobId, JobStoreError> {
        self.block_on(self.insert_job(&job))
    }

    fn get(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError> {
        self.block_on(self.load_job(id))
    }

    fn delete_pending(&self, id: RetryJobId) -> Result<bool, JobStoreError> {
        self.block_on(self.delete_pending_job(id))
    }

    fn try_claim(&self, id: RetryJobId) -> Result<Option<RetryJob>, JobStoreError> {
        self.block_on(self.claim_job(id))
    }

    fn finish(&self, id: RetryJobId, finish: JobFinish) -> Result<RetryJob, JobStoreError> {
        self.block_on(self.finish_job(id, finish))
    }

    fn list_by_status(
        &self,
        status: Option<RetryJobStatus>,
        limit: usize,
    ) -> Result<Vec<RetryJob>, JobStoreError> {
        self.block_on(self.list_jobs(status, limit))
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        self.block_on(self.job_stats())
    }
}

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<RetryJob, JobStoreError> {
    let descriptor: serde_json::Value = row
        .try_get("descriptor")
        .map_err(|e| read_error("descriptor", e))?;
    let descriptor: OperationDescriptor = serde_json::from_value(descriptor)
        .map_err(|e| JobStoreError::Storage(format!("failed to decode descriptor: {e}")))?;
    let status: String = row.try_get("status").map_err(|e| read_error("status", e))?;

    let id: Uuid = row.try_get("id").map_err(|e| read_error("id", e))?;
    let predecessor_id: Option<Uuid> = row
        .try_get("predecessor_id")
        .map_err(|e| read_error("predecessor_id", e))?;
    let successor_id: Option<Uuid> = row
        .try_get("successor_id")
        .map_err(|e| read_error("successor_id", e))?;
    let record_count: i64 = row
        .try_get("record_count")
        .map_err(|e| read_error("record_count", e))?;
    let retries_left: i32 = row
        .try_get("retries_left")
        .map_err(|e| read_error("retries_left", e))?;
    let attempt: i32 = row.try_get("attempt").map_err(|e| read_error("attempt", e))?;
    let base_delay_ms: i64 = row
        .try_get("base_delay_ms")
        .map_err(|e| read_error("base_delay_ms", e))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| read_error("created_at", e))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| read_error("updated_at", e))?;
    let scheduled_for: DateTime<Utc> = row
        .try_get("scheduled_for")
        .map_err(|e| read_error("scheduled_for", e))?;

    Ok(RetryJob {
        id: RetryJobId::from_uuid(id),
        descriptor,
        entity_type: row
            .try_get("entity_type")
            .map_err(|e| read_error("entity_type", e))?,
        serialized_records: row
            .try_get("serialized_records")
            .map_err(|e| read_error("serialized_records", e))?,
        record_count: record_count.max(0) as usize,
        retries_left: retries_left.max(0) as u32,
        attempt: attempt.max(1) as u32,
        base_delay_ms: base_delay_ms.max(0) as u64,
        status: status.parse().map_err(JobStoreError::Storage)?,
        error_message: row
            .try_get("error_message")
            .map_err(|e| read_error("error_message", e))?,
        error_detail: row
            .try_get("error_detail")
            .map_err(|e| read_error("error_detail", e))?,
        predecessor_id: predecessor_id.map(RetryJobId::from_uuid),
        successor_id: successor_id.map(RetryJobId::from_uuid),
        created_at,
        updated_at,
        scheduled_for,
    })
}

fn read_error(column: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("failed to read {column}: {err}"))
}

/// Map SQLx errors to JobStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            JobStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        _ => JobStoreError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
