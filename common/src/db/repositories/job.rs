// Repository for jobs: the queue-visible work items spawned from task executions.

use super::queries::job_queries::SELECT_ALL_COLUMNS;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Job, JobStatus, TaskType, TriggerSource};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct JobRow {
    uuid: Uuid,
    job_id: String,
    api_key_id: Uuid,
    job_type: String,
    job_queue_name: String,
    url: String,
    payload: Value,
    origin: String,
    status: String,
    is_success: Option<bool>,
    total: i64,
    completed: i64,
    failed: i64,
    credits_used: i64,
    deducted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expire_at: DateTime<Utc>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Job {
            uuid: row.uuid,
            job_id: row.job_id,
            api_key_id: row.api_key_id,
            job_type: TaskType::from_str(&row.job_type).unwrap_or(TaskType::Scrape),
            job_queue_name: row.job_queue_name,
            url: row.url,
            payload: row.payload,
            origin: parse_trigger_source(&row.origin),
            status: parse_status(&row.status),
            is_success: row.is_success,
            total: row.total,
            completed: row.completed,
            failed: row.failed,
            credits_used: row.credits_used,
            deducted_at: row.deducted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expire_at: row.expire_at,
        }
    }
}

fn parse_status(s: &str) -> JobStatus {
    match s {
        "pending" => JobStatus::Pending,
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Cancelled,
    }
}

fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Cancelled => "cancelled",
    }
}

fn parse_trigger_source(s: &str) -> TriggerSource {
    match s {
        "manual" => TriggerSource::Manual,
        "system" => TriggerSource::System,
        _ => TriggerSource::Scheduler,
    }
}

fn trigger_source_str(source: TriggerSource) -> &'static str {
    match source {
        TriggerSource::Scheduler => "scheduler",
        TriggerSource::Manual => "manual",
        TriggerSource::System => "system",
    }
}

#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: DbPool,
}

impl JobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, job: &Job) -> Result<Job, DatabaseError> {
        let query = format!(
            "INSERT INTO jobs (uuid, job_id, api_key_id, job_type, job_queue_name, url, payload, origin,
                status, is_success, total, completed, failed, credits_used, deducted_at,
                created_at, updated_at, expire_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
             RETURNING {SELECT_ALL_COLUMNS}"
        );

        let row: JobRow = sqlx::query_as(&query)
            .bind(job.uuid)
            .bind(&job.job_id)
            .bind(job.api_key_id)
            .bind(job.job_type.to_string())
            .bind(&job.job_queue_name)
            .bind(&job.url)
            .bind(&job.payload)
            .bind(trigger_source_str(job.origin))
            .bind(status_str(job.status))
            .bind(job.is_success)
            .bind(job.total)
            .bind(job.completed)
            .bind(job.failed)
            .bind(job.credits_used)
            .bind(job.deducted_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.expire_at)
            .fetch_one(self.pool.pool())
            .await?;

        Ok(row.into())
    }

    /// Create a job inside a caller-managed transaction, committed atomically alongside
    /// the task_executions row that references it.
    pub async fn create_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job: &Job,
    ) -> Result<Job, DatabaseError> {
        let query = format!(
            "INSERT INTO jobs (uuid, job_id, api_key_id, job_type, job_queue_name, url, payload, origin,
                status, is_success, total, completed, failed, credits_used, deducted_at,
                created_at, updated_at, expire_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
             RETURNING {SELECT_ALL_COLUMNS}"
        );

        let row: JobRow = sqlx::query_as(&query)
            .bind(job.uuid)
            .bind(&job.job_id)
            .bind(job.api_key_id)
            .bind(job.job_type.to_string())
            .bind(&job.job_queue_name)
            .bind(&job.url)
            .bind(&job.payload)
            .bind(trigger_source_str(job.origin))
            .bind(status_str(job.status))
            .bind(job.is_success)
            .bind(job.total)
            .bind(job.completed)
            .bind(job.failed)
            .bind(job.credits_used)
            .bind(job.deducted_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.expire_at)
            .fetch_one(&mut **tx)
            .await?;

        Ok(row.into())
    }

    pub async fn find_by_job_id(&self, job_id: &str) -> Result<Job, DatabaseError> {
        let query = format!("SELECT {SELECT_ALL_COLUMNS} FROM jobs WHERE job_id = $1");
        let row: JobRow = sqlx::query_as(&query).bind(job_id).fetch_one(self.pool.pool()).await?;
        Ok(row.into())
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Job, DatabaseError> {
        let query = format!("SELECT {SELECT_ALL_COLUMNS} FROM jobs WHERE uuid = $1");
        let row: JobRow = sqlx::query_as(&query).bind(uuid).fetch_one(self.pool.pool()).await?;
        Ok(row.into())
    }

    pub async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        is_success: Option<bool>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = $1, is_success = $2, updated_at = now() WHERE job_id = $3",
        )
        .bind(status_str(status))
        .bind(is_success)
        .bind(job_id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    /// Atomically bump completed/failed counters, used by the crawl progress tracker's
    /// page-done hook so concurrent workers never lose an increment.
    pub async fn increment_progress(
        &self,
        job_id: &str,
        completed_delta: i64,
        failed_delta: i64,
    ) -> Result<Job, DatabaseError> {
        let query = format!(
            "UPDATE jobs SET completed = completed + $1, failed = failed + $2, updated_at = now()
             WHERE job_id = $3
             RETURNING {SELECT_ALL_COLUMNS}"
        );
        let row: JobRow = sqlx::query_as(&query)
            .bind(completed_delta)
            .bind(failed_delta)
            .bind(job_id)
            .fetch_one(self.pool.pool())
            .await?;
        Ok(row.into())
    }

    pub async fn set_total(&self, job_id: &str, total: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE jobs SET total = $1, updated_at = now() WHERE job_id = $2")
            .bind(total)
            .bind(job_id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    pub async fn mark_deducted(&self, job_id: &str, credits_used: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE jobs SET credits_used = $1, deducted_at = now(), updated_at = now()
             WHERE job_id = $2",
        )
        .bind(credits_used)
        .bind(job_id)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    /// Optimistically advance `credits_used` to `target_used`, succeeding only if it
    /// still equals `expected_before` at write time. Returns `None` on conflict so the
    /// billing engine's chargeToUsed loop can re-read and retry.
    pub async fn compare_and_set_credits_used(
        &self,
        job_id: &str,
        expected_before: i64,
        target_used: i64,
    ) -> Result<Option<Job>, DatabaseError> {
        let query = format!(
            "UPDATE jobs SET credits_used = $1, deducted_at = now(), updated_at = now()
             WHERE job_id = $2 AND credits_used = $3
             RETURNING {SELECT_ALL_COLUMNS}"
        );
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(target_used)
            .bind(job_id)
            .bind(expected_before)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row.map(Into::into))
    }

    pub async fn find_stale_crawl_jobs(
        &self,
        inactive_before: DateTime<Utc>,
    ) -> Result<Vec<Job>, DatabaseError> {
        let query = format!(
            "SELECT {SELECT_ALL_COLUMNS} FROM jobs
             WHERE job_type = 'crawl' AND status = 'running' AND updated_at < $1"
        );
        let rows: Vec<JobRow> =
            sqlx::query_as(&query).bind(inactive_before).fetch_all(self.pool.pool()).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_round_trips() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(parse_status(status_str(status)), status);
        }
    }

    #[test]
    fn trigger_source_round_trips() {
        assert!(matches!(
            parse_trigger_source(trigger_source_str(TriggerSource::System)),
            TriggerSource::System
        ));
    }
}
