// Repository for billing_ledger: the append-only, idempotent charge log.

use super::queries::billing_ledger_queries::SELECT_ALL_COLUMNS;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{BillingLedgerEntry, ChargeMode};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct BillingLedgerRow {
    uuid: Uuid,
    job_id: String,
    api_key_id: Uuid,
    mode: String,
    reason: String,
    idempotency_key: String,
    charged: i64,
    before_used: i64,
    after_used: i64,
    before_credits: Option<i64>,
    after_credits: Option<i64>,
    charge_details: Value,
    created_at: DateTime<Utc>,
}

impl From<BillingLedgerRow> for BillingLedgerEntry {
    fn from(row: BillingLedgerRow) -> Self {
        BillingLedgerEntry {
            uuid: row.uuid,
            job_id: row.job_id,
            api_key_id: row.api_key_id,
            mode: parse_mode(&row.mode),
            reason: row.reason,
            idempotency_key: row.idempotency_key,
            charged: row.charged,
            before_used: row.before_used,
            after_used: row.after_used,
            before_credits: row.before_credits,
            after_credits: row.after_credits,
            charge_details: if row.charge_details.is_null() { None } else { Some(row.charge_details) },
            created_at: row.created_at,
        }
    }
}

fn parse_mode(s: &str) -> ChargeMode {
    if s == "target" {
        ChargeMode::Target
    } else {
        ChargeMode::Delta
    }
}

fn mode_str(mode: ChargeMode) -> &'static str {
    match mode {
        ChargeMode::Delta => "delta",
        ChargeMode::Target => "target",
    }
}

#[derive(Debug, Clone)]
pub struct BillingLedgerRepository {
    pool: DbPool,
}

impl BillingLedgerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a ledger entry unless one with the same idempotency key already exists.
    /// Returns `None` when the charge was already recorded, signalling the caller to
    /// treat this attempt as a no-op rather than double-debiting the key.
    pub async fn insert_if_absent(
        &self,
        entry: &BillingLedgerEntry,
    ) -> Result<Option<BillingLedgerEntry>, DatabaseError> {
        let query = format!(
            "INSERT INTO billing_ledger (uuid, job_id, api_key_id, mode, reason, idempotency_key,
                charged, before_used, after_used, before_credits, after_credits, charge_details,
                created_at)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
             ON CONFLICT (idempotency_key) DO NOTHING
             RETURNING {SELECT_ALL_COLUMNS}"
        );

        let row: Option<BillingLedgerRow> = sqlx::query_as(&query)
            .bind(entry.uuid)
            .bind(&entry.job_id)
            .bind(entry.api_key_id)
            .bind(mode_str(entry.mode))
            .bind(&entry.reason)
            .bind(&entry.idempotency_key)
            .bind(entry.charged)
            .bind(entry.before_used)
            .bind(entry.after_used)
            .bind(entry.before_credits)
            .bind(entry.after_credits)
            .bind(entry.charge_details.clone().unwrap_or(Value::Null))
            .bind(entry.created_at)
            .fetch_optional(self.pool.pool())
            .await?;

        Ok(row.map(Into::into))
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<BillingLedgerEntry>, DatabaseError> {
        let query =
            format!("SELECT {SELECT_ALL_COLUMNS} FROM billing_ledger WHERE idempotency_key = $1");
        let row: Option<BillingLedgerRow> =
            sqlx::query_as(&query).bind(key).fetch_optional(self.pool.pool()).await?;
        Ok(row.map(Into::into))
    }

    pub async fn total_charged_for_job(&self, job_id: &str) -> Result<i64, DatabaseError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(charged), 0) as total FROM billing_ledger WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_one(self.pool.pool())
        .await?;

        use sqlx::Row;
        Ok(row.try_get::<i64, _>("total")?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_string_round_trips() {
        for mode in [ChargeMode::Delta, ChargeMode::Target] {
            assert_eq!(parse_mode(mode_str(mode)), mode);
        }
    }
}
