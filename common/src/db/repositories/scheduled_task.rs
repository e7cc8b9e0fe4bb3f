// Repository for scheduled_tasks: the user-configured recurring task definitions.

use super::queries::scheduled_task_queries::SELECT_ALL_COLUMNS;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{ConcurrencyMode, Owner, ScheduledTask, TaskType};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct ScheduledTaskRow {
    uuid: Uuid,
    api_key_id: Uuid,
    user_id: Option<Uuid>,
    name: String,
    description: Option<String>,
    cron_expression: String,
    timezone: String,
    task_type: String,
    task_payload: Value,
    concurrency_mode: String,
    max_executions_per_day: Option<i32>,
    min_credits_required: i64,
    is_active: bool,
    is_paused: bool,
    pause_reason: Option<String>,
    next_execution_at: Option<DateTime<Utc>>,
    last_execution_at: Option<DateTime<Utc>>,
    total_executions: i64,
    successful_executions: i64,
    failed_executions: i64,
    consecutive_failures: i32,
    tags: Vec<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ScheduledTaskRow> for ScheduledTask {
    fn from(row: ScheduledTaskRow) -> Self {
        ScheduledTask {
            uuid: row.uuid,
            owner: Owner { api_key_id: row.api_key_id, user_id: row.user_id },
            name: row.name,
            description: row.description,
            cron_expression: row.cron_expression,
            timezone: row.timezone,
            task_type: TaskType::from_str(&row.task_type).unwrap_or(TaskType::Scrape),
            task_payload: row.task_payload,
            concurrency_mode: if row.concurrency_mode == "queue" {
                ConcurrencyMode::Queue
            } else {
                ConcurrencyMode::Skip
            },
            max_executions_per_day: row.max_executions_per_day,
            min_credits_required: row.min_credits_required,
            is_active: row.is_active,
            is_paused: row.is_paused,
            pause_reason: row.pause_reason,
            next_execution_at: row.next_execution_at,
            last_execution_at: row.last_execution_at,
            total_executions: row.total_executions,
            successful_executions: row.successful_executions,
            failed_executions: row.failed_executions,
            consecutive_failures: row.consecutive_failures,
            tags: row.tags,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduledTaskFilter {
    pub owner_api_key_id: Option<Uuid>,
    pub updated_since: Option<DateTime<Utc>>,
    pub eligible_only: bool,
}

#[derive(Debug, Clone)]
pub struct ScheduledTaskRepository {
    pool: DbPool,
}

impl ScheduledTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, task: &ScheduledTask) -> Result<ScheduledTask, DatabaseError> {
        let query = format!(
            "INSERT INTO scheduled_tasks (uuid, api_key_id, user_id, name, description,
                cron_expression, timezone, task_type, task_payload, concurrency_mode,
                max_executions_per_day, min_credits_required, is_active, is_paused, pause_reason,
                next_execution_at, last_execution_at, total_executions, successful_executions,
                failed_executions, consecutive_failures, tags, metadata, created_at, updated_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25)
             RETURNING {SELECT_ALL_COLUMNS}"
        );

        let row: ScheduledTaskRow = sqlx::query_as(&query)
            .bind(task.uuid)
            .bind(task.owner.api_key_id)
            .bind(task.owner.user_id)
            .bind(&task.name)
            .bind(&task.description)
            .bind(&task.cron_expression)
            .bind(&task.timezone)
            .bind(task.task_type.to_string())
            .bind(&task.task_payload)
            .bind(concurrency_mode_str(task.concurrency_mode))
            .bind(task.max_executions_per_day)
            .bind(task.min_credits_required)
            .bind(task.is_active)
            .bind(task.is_paused)
            .bind(&task.pause_reason)
            .bind(task.next_execution_at)
            .bind(task.last_execution_at)
            .bind(task.total_executions)
            .bind(task.successful_executions)
            .bind(task.failed_executions)
            .bind(task.consecutive_failures)
            .bind(&task.tags)
            .bind(&task.metadata)
            .bind(task.created_at)
            .bind(task.updated_at)
            .fetch_one(self.pool.pool())
            .await?;

        Ok(row.into())
    }

    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<ScheduledTask, DatabaseError> {
        let query = format!("SELECT {SELECT_ALL_COLUMNS} FROM scheduled_tasks WHERE uuid = $1");
        let row: ScheduledTaskRow =
            sqlx::query_as(&query).bind(uuid).fetch_one(self.pool.pool()).await?;
        Ok(row.into())
    }

    /// Rows touched since a reference instant captured *before* issuing the query, so the
    /// reconciliation loop never misses a concurrent update racing the sync.
    pub async fn find_updated_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ScheduledTask>, DatabaseError> {
        let query =
            format!("SELECT {SELECT_ALL_COLUMNS} FROM scheduled_tasks WHERE updated_at >= $1");
        let rows: Vec<ScheduledTaskRow> =
            sqlx::query_as(&query).bind(since).fetch_all(self.pool.pool()).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn find_eligible(&self) -> Result<Vec<ScheduledTask>, DatabaseError> {
        let query = format!(
            "SELECT {SELECT_ALL_COLUMNS} FROM scheduled_tasks WHERE is_active = true AND is_paused = false"
        );
        let rows: Vec<ScheduledTaskRow> = sqlx::query_as(&query).fetch_all(self.pool.pool()).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn count_active_for_owner(&self, api_key_id: Uuid) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as count FROM scheduled_tasks WHERE api_key_id = $1 AND is_active = true",
        )
        .bind(api_key_id)
        .fetch_one(self.pool.pool())
        .await?;

        use sqlx::Row;
        Ok(row.try_get::<i64, _>("count")?)
    }

    pub async fn update(&self, task: &ScheduledTask) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET is_active = $1, is_paused = $2, pause_reason = $3,
                next_execution_at = $4, last_execution_at = $5, total_executions = $6,
                successful_executions = $7, failed_executions = $8, consecutive_failures = $9,
                updated_at = $10
             WHERE uuid = $11",
        )
        .bind(task.is_active)
        .bind(task.is_paused)
        .bind(&task.pause_reason)
        .bind(task.next_execution_at)
        .bind(task.last_execution_at)
        .bind(task.total_executions)
        .bind(task.successful_executions)
        .bind(task.failed_executions)
        .bind(task.consecutive_failures)
        .bind(Utc::now())
        .bind(task.uuid)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    pub async fn pause(&self, uuid: Uuid, reason: &str) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET is_paused = true, pause_reason = $1, updated_at = now()
             WHERE uuid = $2",
        )
        .bind(reason)
        .bind(uuid)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    pub async fn resume(&self, uuid: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE scheduled_tasks SET is_paused = false, pause_reason = NULL, updated_at = now()
             WHERE uuid = $1",
        )
        .bind(uuid)
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }
}

fn concurrency_mode_str(mode: ConcurrencyMode) -> &'static str {
    match mode {
        ConcurrencyMode::Skip => "skip",
        ConcurrencyMode::Queue => "queue",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_mode_string_round_trips() {
        assert_eq!(concurrency_mode_str(ConcurrencyMode::Skip), "skip");
        assert_eq!(concurrency_mode_str(ConcurrencyMode::Queue), "queue");
    }
}
