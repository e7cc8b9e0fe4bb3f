// Repository for the billing-relevant slice of api_keys: credits and last_used_at.

use super::queries::api_key_queries::SELECT_ALL_COLUMNS;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::ApiKey;
use chrono::Utc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ApiKeyRepository {
    pool: DbPool,
}

impl ApiKeyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<ApiKey, DatabaseError> {
        let query = format!("SELECT {SELECT_ALL_COLUMNS} FROM api_keys WHERE id = $1");
        let key: ApiKey = sqlx::query_as(&query).bind(id).fetch_one(self.pool.pool()).await?;
        Ok(key)
    }

    pub async fn touch_last_used(&self, id: Uuid) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE api_keys SET last_used_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound);
        }
        Ok(())
    }

    /// Deduct credits only if the key currently holds enough, in one atomic statement so
    /// concurrent charges against the same key can't both pass a prior balance check.
    pub async fn deduct_if_sufficient(
        &self,
        id: Uuid,
        amount: i64,
    ) -> Result<Option<ApiKey>, DatabaseError> {
        let query = format!(
            "UPDATE api_keys SET credits = credits - $1, last_used_at = now()
             WHERE id = $2 AND credits >= $1
             RETURNING {SELECT_ALL_COLUMNS}"
        );
        let key: Option<ApiKey> =
            sqlx::query_as(&query).bind(amount).bind(id).fetch_optional(self.pool.pool()).await?;
        Ok(key)
    }

    /// Debit credits unconditionally, allowed to go negative. Used by the billing
    /// engine's delta and target charges, where the balance check already happened
    /// (or is deliberately skipped) upstream and a negative balance is caught later
    /// by the scheduler's pre-trigger credit gate rather than blocked here.
    pub async fn debit(&self, id: Uuid, amount: i64) -> Result<ApiKey, DatabaseError> {
        let query = format!(
            "UPDATE api_keys SET credits = credits - $1, last_used_at = now()
             WHERE id = $2
             RETURNING {SELECT_ALL_COLUMNS}"
        );
        let key: ApiKey = sqlx::query_as(&query).bind(amount).bind(id).fetch_one(self.pool.pool()).await?;
        Ok(key)
    }
}
