//! PostgreSQL implementation of JobStore
//!
//! One row per job in `generation_jobs`. Conditional updates lock the row
//! (`SELECT ... FOR UPDATE`), apply [`JobUpdate`] in Rust and write the row
//! back inside one transaction, so the document-level atomicity guarantee
//! holds across concurrent workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{error, instrument};
use uuid::Uuid;

use super::store::*;
use crate::job::{GenerationRequest, Job, JobStatus};

const JOB_COLUMNS: &str = "id, owner_id, kind, payload, status, progress, message, result, \
                           error, created_at, updated_at, completed_at, failed_at";

/// PostgreSQL implementation of JobStore
///
/// # Example
///
/// ```ignore
/// use contentgen_jobs::PostgresJobStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/contentgen").await?;
/// let store = PostgresJobStore::new(pool);
/// ```
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Create a new PostgreSQL store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(context: &str, e: sqlx::Error) -> StoreError {
    error!("{}: {}", context, e);
    StoreError::Database(e.to_string())
}

fn row_to_job(row: &PgRow) -> Result<Job, StoreError> {
    let kind: String = row.get("kind");
    let payload: serde_json::Value = row.get("payload");
    let request: GenerationRequest =
        serde_json::from_value(json!({ "kind": kind, "payload": payload }))
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let status: String = row.get("status");
    let status: JobStatus = status.parse().map_err(StoreError::Serialization)?;
    let progress: i16 = row.get("progress");

    Ok(Job {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        request,
        status,
        progress: progress.clamp(0, 100) as u8,
        message: row.get("message"),
        result: row.get("result"),
        error: row.get("error"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        completed_at: row.get("completed_at"),
        failed_at: row.get("failed_at"),
    })
}

fn payload_value(request: &GenerationRequest) -> Result<serde_json::Value, StoreError> {
    let mut tagged =
        serde_json::to_value(request).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(tagged
        .get_mut("payload")
        .map(serde_json::Value::take)
        .unwrap_or_default())
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind()))]
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        let payload = payload_value(&job.request)?;

        let result = sqlx::query(
            r#"
            INSERT INTO generation_jobs
                (id, owner_id, kind, payload, status, progress, message, result, error,
                 created_at, updated_at, completed_at, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(&job.owner_id)
        .bind(job.kind().as_str())
        .bind(payload)
        .bind(job.status.as_str())
        .bind(job.progress as i16)
        .bind(&job.message)
        .bind(&job.result)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .bind(job.failed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert job", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(job.id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load job", e))?
        .ok_or(StoreError::JobNotFound(job_id))?;

        row_to_job(&row)
    }

    #[instrument(skip(self, update), fields(status = ?update.status))]
    async fn update(
        &self,
        job_id: Uuid,
        update: JobUpdate,
        expected_status: Option<JobStatus>,
    ) -> Result<Job, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to lock job", e))?
        .ok_or(StoreError::JobNotFound(job_id))?;

        let mut job = row_to_job(&row)?;
        update.apply(&mut job, expected_status)?;

        sqlx::query(
            r#"
            UPDATE generation_jobs
            SET status = $2,
                progress = $3,
                message = $4,
                result = $5,
                error = $6,
                updated_at = $7,
                completed_at = $8,
                failed_at = $9
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.progress as i16)
        .bind(&job.message)
        .bind(&job.result)
        .bind(&job.error)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .bind(job.failed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to update job", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit job update", e))?;

        Ok(job)
    }

    #[instrument(skip(self))]
    async fn count(&self, filter: &JobFilter) -> Result<u64, StoreError> {
        let statuses: Vec<String> = filter
            .statuses
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM generation_jobs
            WHERE ($1::text IS NULL OR owner_id = $1)
              AND ($2::text IS NULL OR kind = $2)
              AND (cardinality($3::text[]) = 0 OR status = ANY($3))
            "#,
        )
        .bind(filter.owner_id.as_deref())
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(&statuses)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to count jobs", e))?;

        Ok(count.max(0) as u64)
    }
}
