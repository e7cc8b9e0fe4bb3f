// Repository for task_executions: one row per firing of a ScheduledTask.

use super::queries::task_execution_queries::SELECT_ALL_COLUMNS;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{ExecutionStatus, TaskExecution, TriggerSource};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::Row;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct TaskExecutionRow {
    uuid: Uuid,
    scheduled_task_uuid: Uuid,
    execution_number: i64,
    idempotency_key: String,
    status: String,
    scheduled_for: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    triggered_by: String,
    job_uuid: Option<Uuid>,
    error_message: Option<String>,
    error_code: Option<String>,
    error_details: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TaskExecutionRow> for TaskExecution {
    fn from(row: TaskExecutionRow) -> Self {
        TaskExecution {
            uuid: row.uuid,
            scheduled_task_uuid: row.scheduled_task_uuid,
            execution_number: row.execution_number,
            idempotency_key: row.idempotency_key,
            status: parse_status(&row.status),
            scheduled_for: row.scheduled_for,
            started_at: row.started_at,
            completed_at: row.completed_at,
            triggered_by: parse_trigger_source(&row.triggered_by),
            job_uuid: row.job_uuid,
            error_message: row.error_message,
            error_code: row.error_code,
            error_details: if row.error_details.is_null() { None } else { Some(row.error_details) },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn parse_status(s: &str) -> ExecutionStatus {
    match s {
        "pending" => ExecutionStatus::Pending,
        "running" => ExecutionStatus::Running,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Cancelled,
    }
}

fn parse_trigger_source(s: &str) -> TriggerSource {
    match s {
        "manual" => TriggerSource::Manual,
        "system" => TriggerSource::System,
        _ => TriggerSource::Scheduler,
    }
}

/// Optional filters for listing task executions.
#[derive(Debug, Clone, Default)]
pub struct TaskExecutionFilter {
    pub scheduled_task_uuid: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub triggered_by: Option<TriggerSource>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TaskExecutionRepository {
    pool: DbPool,
}

impl TaskExecutionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, execution: &TaskExecution) -> Result<TaskExecution, DatabaseError> {
        let query = format!(
            "INSERT INTO task_executions (uuid, scheduled_task_uuid, execution_number,
                idempotency_key, status, scheduled_for, started_at, completed_at, triggered_by,
                job_uuid, error_message, error_code, error_details, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING {SELECT_ALL_COLUMNS}"
        );

        let row: TaskExecutionRow = sqlx::query_as(&query)
            .bind(execution.uuid)
            .bind(execution.scheduled_task_uuid)
            .bind(execution.execution_number)
            .bind(&execution.idempotency_key)
            .bind(execution.status.to_string())
            .bind(execution.scheduled_for)
            .bind(execution.started_at)
            .bind(execution.completed_at)
            .bind(trigger_source_str(execution.triggered_by))
            .bind(execution.job_uuid)
            .bind(&execution.error_message)
            .bind(&execution.error_code)
            .bind(execution.error_details.clone().unwrap_or(Value::Null))
            .bind(execution.created_at)
            .bind(execution.updated_at)
            .fetch_one(self.pool.pool())
            .await?;

        Ok(row.into())
    }

    /// Create a task execution inside a caller-managed transaction, so it commits or
    /// rolls back atomically with the Job row the trigger pipeline creates alongside it.
    pub async fn create_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        execution: &TaskExecution,
    ) -> Result<TaskExecution, DatabaseError> {
        let query = format!(
            "INSERT INTO task_executions (uuid, scheduled_task_uuid, execution_number,
                idempotency_key, status, scheduled_for, started_at, completed_at, triggered_by,
                job_uuid, error_message, error_code, error_details, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
             RETURNING {SELECT_ALL_COLUMNS}"
        );

        let row: TaskExecutionRow = sqlx::query_as(&query)
            .bind(execution.uuid)
            .bind(execution.scheduled_task_uuid)
            .bind(execution.execution_number)
            .bind(&execution.idempotency_key)
            .bind(execution.status.to_string())
            .bind(execution.scheduled_for)
            .bind(execution.started_at)
            .bind(execution.completed_at)
            .bind(trigger_source_str(execution.triggered_by))
            .bind(execution.job_uuid)
            .bind(&execution.error_message)
            .bind(&execution.error_code)
            .bind(execution.error_details.clone().unwrap_or(Value::Null))
            .bind(execution.created_at)
            .bind(execution.updated_at)
            .fetch_one(&mut **tx)
            .await?;

        Ok(row.into())
    }

    pub async fn update(&self, execution: &TaskExecution) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE task_executions SET status = $1, started_at = $2, completed_at = $3,
                job_uuid = $4, error_message = $5, error_code = $6, error_details = $7,
                updated_at = $8
             WHERE uuid = $9",
        )
        .bind(execution.status.to_string())
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.job_uuid)
        .bind(&execution.error_message)
        .bind(&execution.error_code)
        .bind(execution.error_details.clone().unwrap_or(Value::Null))
        .bind(Utc::now())
        .bind(execution.uuid)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<TaskExecution>, DatabaseError> {
        let query = format!("SELECT {SELECT_ALL_COLUMNS} FROM task_executions WHERE idempotency_key = $1");
        let row: Option<TaskExecutionRow> =
            sqlx::query_as(&query).bind(key).fetch_optional(self.pool.pool()).await?;
        Ok(row.map(Into::into))
    }

    /// The still-running execution linked to a job, used by the crawl inactivity sweep
    /// which finds stale jobs directly (by `jobs.updated_at`) and needs the matching
    /// execution to fail alongside it.
    pub async fn find_running_by_job_uuid(
        &self,
        job_uuid: Uuid,
    ) -> Result<Option<TaskExecution>, DatabaseError> {
        let query = format!(
            "SELECT {SELECT_ALL_COLUMNS} FROM task_executions
             WHERE job_uuid = $1 AND status = 'running'"
        );
        let row: Option<TaskExecutionRow> =
            sqlx::query_as(&query).bind(job_uuid).fetch_optional(self.pool.pool()).await?;
        Ok(row.map(Into::into))
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<TaskExecution, DatabaseError> {
        let query = format!("SELECT {SELECT_ALL_COLUMNS} FROM task_executions WHERE uuid = $1");
        let row: TaskExecutionRow =
            sqlx::query_as(&query).bind(uuid).fetch_one(self.pool.pool()).await?;
        Ok(row.into())
    }

    pub async fn find_with_filter(
        &self,
        filter: TaskExecutionFilter,
    ) -> Result<Vec<TaskExecution>, DatabaseError> {
        let mut query = format!(
            "SELECT {SELECT_ALL_COLUMNS} FROM task_executions WHERE created_at > now() - interval '30 days'"
        );
        let mut bind_idx = 0;
        let mut clauses = Vec::new();

        if filter.scheduled_task_uuid.is_some() {
            bind_idx += 1;
            clauses.push(format!("scheduled_task_uuid = ${bind_idx}"));
        }
        if filter.status.is_some() {
            bind_idx += 1;
            clauses.push(format!("status = ${bind_idx}"));
        }
        if filter.triggered_by.is_some() {
            bind_idx += 1;
            clauses.push(format!("triggered_by = ${bind_idx}"));
        }
        for clause in &clauses {
            query.push_str(" AND ");
            query.push_str(clause);
        }
        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as(&query);
        if let Some(task_uuid) = filter.scheduled_task_uuid {
            q = q.bind(task_uuid);
        }
        if let Some(status) = filter.status {
            q = q.bind(status.to_string());
        }
        if let Some(trigger) = filter.triggered_by {
            q = q.bind(trigger_source_str(trigger));
        }

        let rows: Vec<TaskExecutionRow> = q.fetch_all(self.pool.pool()).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn has_active_execution(&self, scheduled_task_uuid: Uuid) -> Result<bool, DatabaseError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM task_executions
             WHERE scheduled_task_uuid = $1 AND status IN ('pending', 'running')) as exists",
        )
        .bind(scheduled_task_uuid)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(row.try_get::<bool, _>("exists")?)
    }

    pub async fn count_today(&self, scheduled_task_uuid: Uuid) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM task_executions
             WHERE scheduled_task_uuid = $1 AND scheduled_for >= date_trunc('day', now())",
        )
        .bind(scheduled_task_uuid)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(row.try_get::<i64, _>("count")?)
    }

    /// Task executions that started, or should have started, but never progressed —
    /// the stale-execution sweep table. Covers the three generic cases from the
    /// reconciliation policy; type-specific running-timeout cases (scrape/search/map
    /// runtime caps, crawl inactivity) are evaluated separately by the reconciliation
    /// loop against `jobs.updated_at` since they depend on the linked job's type.
    pub async fn find_stale(
        &self,
        pending_no_start_before: DateTime<Utc>,
        pending_started_before: DateTime<Utc>,
        running_no_start_before: DateTime<Utc>,
    ) -> Result<Vec<TaskExecution>, DatabaseError> {
        let query = format!(
            "SELECT {SELECT_ALL_COLUMNS} FROM task_executions
             WHERE (status = 'pending' AND started_at IS NULL AND created_at < $1)
                OR (status = 'pending' AND started_at IS NOT NULL AND started_at < $2)
                OR (status = 'running' AND started_at IS NULL AND created_at < $3)"
        );

        let rows: Vec<TaskExecutionRow> = sqlx::query_as(&query)
            .bind(pending_no_start_before)
            .bind(pending_started_before)
            .bind(running_no_start_before)
            .fetch_all(self.pool.pool())
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Running executions whose linked job has exceeded its type's runtime cap
    /// (scrape/search/map) or gone inactive past the crawl inactivity window.
    /// `now` is passed in so callers can evaluate all four caps with one query per type.
    pub async fn find_running_over_runtime(
        &self,
        job_type: &str,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<TaskExecution>, DatabaseError> {
        let query = "SELECT te.uuid, te.scheduled_task_uuid, te.execution_number,
                te.idempotency_key, te.status, te.scheduled_for, te.started_at,
                te.completed_at, te.triggered_by, te.job_uuid, te.error_message,
                te.error_code, COALESCE(te.error_details, 'null'::jsonb) as error_details,
                te.created_at, te.updated_at
             FROM task_executions te
             JOIN jobs j ON j.uuid = te.job_uuid
             WHERE te.status = 'running' AND te.started_at IS NOT NULL
                AND te.started_at < $1 AND j.job_type = $2";
        let rows: Vec<TaskExecutionRow> = sqlx::query_as(query)
            .bind(started_before)
            .bind(job_type)
            .fetch_all(self.pool.pool())
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

fn trigger_source_str(source: TriggerSource) -> &'static str {
    match source {
        TriggerSource::Scheduler => "scheduler",
        TriggerSource::Manual => "manual",
        TriggerSource::System => "system",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_status_strings() {
        assert!(matches!(parse_status("completed"), ExecutionStatus::Completed));
        assert!(matches!(parse_status("running"), ExecutionStatus::Running));
    }

    #[test]
    fn trigger_source_round_trips() {
        assert!(matches!(parse_trigger_source(trigger_source_str(TriggerSource::Manual)), TriggerSource::Manual));
    }
}
