// Repository for templates: reusable task definitions resolved at trigger time.

use super::queries::template_queries::SELECT_ALL_COLUMNS;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{TaskType, Template};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct TemplateRow {
    uuid: Uuid,
    api_key_id: Uuid,
    name: String,
    task_type: String,
    task_payload: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TemplateRow> for Template {
    fn from(row: TemplateRow) -> Self {
        Template {
            uuid: row.uuid,
            api_key_id: row.api_key_id,
            name: row.name,
            task_type: TaskType::from_str(&row.task_type).unwrap_or(TaskType::Scrape),
            task_payload: row.task_payload,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateRepository {
    pool: DbPool,
}

impl TemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Resolved at dispatch time, not at task-registration time, so the caller (the
    /// scheduler's trigger pipeline) always sees the template's current definition.
    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Template, DatabaseError> {
        let query = format!("SELECT {SELECT_ALL_COLUMNS} FROM templates WHERE uuid = $1");
        let row: TemplateRow = sqlx::query_as(&query).bind(uuid).fetch_one(self.pool.pool()).await?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_row_falls_back_to_scrape_for_unknown_task_type() {
        let row = TemplateRow {
            uuid: Uuid::new_v4(),
            api_key_id: Uuid::new_v4(),
            name: "x".to_string(),
            task_type: "garbage".to_string(),
            task_payload: Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let template: Template = row.into();
        assert!(matches!(template.task_type, TaskType::Scrape));
    }
}
