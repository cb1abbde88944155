//! Postgres queue backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::{
    FailureOutcome, Job, JobId, JobStatus, QueueBackend, QueueStats, RetryDeadOutcome, RetryPolicy,
    MAX_BACKOFF,
};

/// Columns every query returns, in [`JobRow`] order.
const JOB_COLUMNS: &str = "id, type AS job_type, payload, status, attempts, max_retries, \
                           last_error, next_run_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    max_retries: i32,
    last_error: Option<String>,
    next_run_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = crate::error::HeraldError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(Job {
            id: JobId(row.id),
            job_type: row.job_type,
            payload: row.payload,
            status: row.status.parse()?,
            attempts: row.attempts.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            last_error: row.last_error,
            next_run_at: row.next_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FailedRow {
    status: String,
    attempts: i32,
    next_run_at: DateTime<Utc>,
}

/// Queue rows in the `jobs` table.
///
/// Claim uses `FOR UPDATE SKIP LOCKED`, so any number of dispatcher
/// processes can share the table without double-claiming.
#[derive(Debug, Clone)]
pub struct PgQueueBackend {
    pool: PgPool,
}

impl PgQueueBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueBackend for PgQueueBackend {
    async fn insert(&self, job: &Job) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, type, payload, status, attempts, max_retries,
                              last_error, next_run_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.0)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.attempts as i32)
        .bind(job.max_retries as i32)
        .bind(&job.last_error)
        .bind(job.next_run_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'processing', updated_at = $1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND next_run_at <= $1
                ORDER BY next_run_at, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn complete(&self, id: JobId, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', updated_at = $2
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id.0)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<FailureOutcome> {
        // Right-hand sides see the pre-update `attempts`, so the backoff
        // exponent below is (attempts after this failure) - 1.
        let row = sqlx::query_as::<_, FailedRow>(
            r#"
            UPDATE jobs
            SET attempts    = attempts + 1,
                last_error  = $2,
                updated_at  = $3,
                status      = CASE WHEN attempts + 1 >= max_retries
                                   THEN 'dead' ELSE 'pending' END,
                next_run_at = CASE WHEN attempts + 1 >= max_retries
                                   THEN next_run_at
                                   ELSE $3 + make_interval(secs => LEAST($4 * power(2, LEAST(attempts, 20)), $5))
                              END
            WHERE id = $1 AND status = 'processing'
            RETURNING status, attempts, next_run_at
            "#,
        )
        .bind(id.0)
        .bind(error)
        .bind(now)
        .bind(policy.base_backoff.as_secs_f64())
        .bind(MAX_BACKOFF.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(FailureOutcome::Skipped);
        };

        let attempts = row.attempts.max(0) as u32;
        Ok(match row.status.parse::<JobStatus>()? {
            JobStatus::Dead => FailureOutcome::DeadLettered { attempts },
            _ => FailureOutcome::Rescheduled {
                attempts,
                next_run_at: row.next_run_at,
            },
        })
    }

    async fn reset_stuck(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', updated_at = $2
            WHERE status = 'processing' AND updated_at < $1
            "#,
        )
        .bind(stale_before)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS);
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    async fn list_dead(&self, limit: u32) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = 'dead' ORDER BY updated_at DESC LIMIT $1",
            JOB_COLUMNS
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Job::try_from)
            .collect()
    }

    async fn retry_dead(&self, id: JobId, now: DateTime<Utc>) -> Result<RetryDeadOutcome> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = 0, next_run_at = $2, updated_at = $2
            WHERE id = $1 AND status = 'dead'
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        if let Some(row) = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.0)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(RetryDeadOutcome::Requeued(row.try_into()?));
        }

        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        match status {
            None => Ok(RetryDeadOutcome::NotFound),
            Some(status) => Ok(RetryDeadOutcome::NotDead(status.parse()?)),
        }
    }

    async fn delete(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*)::bigint FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for (status, count) in rows {
            counts.push((status.parse::<JobStatus>()?, count.max(0) as u64));
        }
        Ok(QueueStats::from_counts(counts))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
