// Billing engine: charges a job's owning api key against the append-only ledger.
//
// Two modes mirror the two ways a caller knows how much to charge: `charge_delta`
// for an incremental charge (e.g. one page of a crawl), `charge_to_used` for
// driving a job's total `credits_used` to an absolute target (e.g. finalizing a
// scrape at its true page count). Both are idempotent on `idempotency_key` so a
// retried call never double-debits the key.

use crate::db::repositories::{ApiKeyRepository, BillingLedgerRepository, JobRepository};
use crate::errors::BillingError;
use crate::models::{BillingLedgerEntry, ChargeMode, TaskType};
use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const CHARGE_TO_USED_MAX_RETRIES: u32 = 5;

/// Credits a trigger firing is expected to cost, before the actual page count is
/// known. Crawl/search/map scale with the caller-supplied `limit`; scrape is a flat
/// single-page cost. The scheduler's credit gate takes `max(task.min_credits_required,
/// this)` before allowing a trigger through.
pub fn estimate_required_credits(task_type: TaskType, payload: &Value) -> i64 {
    let limit = payload.get("limit").and_then(Value::as_i64).filter(|n| *n > 0);

    match task_type {
        TaskType::Scrape => 1,
        TaskType::Crawl | TaskType::Map => limit.unwrap_or(10),
        TaskType::Search => limit.unwrap_or(1),
        TaskType::Template => 1,
    }
}

/// Result of a successful charge, returned to the caller for response shaping.
#[derive(Debug, Clone, Copy)]
pub struct ChargeOutcome {
    pub charged: i64,
    pub remaining_credits: i64,
}

#[async_trait::async_trait]
pub trait BillingEngine: Send + Sync {
    async fn charge_delta(
        &self,
        job_id: &str,
        delta: i64,
        reason: &str,
        idempotency_key: &str,
        charge_details: Option<Value>,
    ) -> Result<ChargeOutcome, BillingError>;

    async fn charge_to_used(
        &self,
        job_id: &str,
        target_used: i64,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, BillingError>;
}

#[derive(Clone)]
pub struct PostgresBillingEngine {
    jobs: JobRepository,
    api_keys: ApiKeyRepository,
    ledger: BillingLedgerRepository,
}

impl PostgresBillingEngine {
    pub fn new(jobs: JobRepository, api_keys: ApiKeyRepository, ledger: BillingLedgerRepository) -> Self {
        Self { jobs, api_keys, ledger }
    }
}

#[async_trait::async_trait]
impl BillingEngine for PostgresBillingEngine {
    /// Charge an incremental `delta` against the job's owning key.
    ///
    /// 1. Insert the ledger row idempotently; a `None` return means this key was
    ///    already charged, so report a zero-charge no-op instead of debiting again.
    /// 2. Read the job's current `credits_used` as `before_used`.
    /// 3. Bump the job's `credits_used` by `delta` and stamp `deducted_at`.
    /// 4. Debit the api key by `delta` unconditionally — it may go negative, by design;
    ///    insufficient-balance detection happens at the next scheduler trigger.
    /// 5. Backfill `after_used`/`before_credits`/`after_credits` onto the ledger row.
    #[instrument(skip(self, charge_details), fields(job_id = %job_id, delta))]
    async fn charge_delta(
        &self,
        job_id: &str,
        delta: i64,
        reason: &str,
        idempotency_key: &str,
        charge_details: Option<Value>,
    ) -> Result<ChargeOutcome, BillingError> {
        let job = self.jobs.find_by_job_id(job_id).await.map_err(|_| {
            BillingError::JobNotFound(job_id.to_string())
        })?;

        let charge_details = normalize_charge_details(delta, charge_details);

        let draft = BillingLedgerEntry {
            uuid: Uuid::new_v4(),
            job_id: job_id.to_string(),
            api_key_id: job.api_key_id,
            mode: ChargeMode::Delta,
            reason: reason.to_string(),
            idempotency_key: idempotency_key.to_string(),
            charged: delta,
            before_used: job.credits_used,
            after_used: job.credits_used + delta,
            before_credits: None,
            after_credits: None,
            charge_details,
            created_at: Utc::now(),
        };

        let inserted = self.ledger.insert_if_absent(&draft).await?;
        let Some(_entry) = inserted else {
            info!(idempotency_key, "charge already recorded, skipping");
            let key = self.api_keys.find_by_id(job.api_key_id).await?;
            return Ok(ChargeOutcome { charged: 0, remaining_credits: key.credits });
        };

        self.jobs.mark_deducted(job_id, job.credits_used + delta).await?;
        let debited = self.api_keys.debit(job.api_key_id, delta).await?;

        info!(charged = delta, remaining_credits = debited.credits, "charge_delta applied");

        Ok(ChargeOutcome { charged: delta, remaining_credits: debited.credits })
    }

    /// Drive the job's `credits_used` to an absolute `target_used`, never refunding.
    ///
    /// Uses an optimistic compare-and-swap on `credits_used` (read, then
    /// `UPDATE ... WHERE credits_used = before_used`) so a concurrent charge on the
    /// same job can't silently clobber this one; on conflict the whole sequence
    /// retries from the read, up to [`CHARGE_TO_USED_MAX_RETRIES`] attempts.
    #[instrument(skip(self), fields(job_id = %job_id, target_used))]
    async fn charge_to_used(
        &self,
        job_id: &str,
        target_used: i64,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, BillingError> {
        for attempt in 0..CHARGE_TO_USED_MAX_RETRIES {
            let job = self.jobs.find_by_job_id(job_id).await.map_err(|_| {
                BillingError::JobNotFound(job_id.to_string())
            })?;
            let before_used = job.credits_used;

            if target_used <= before_used {
                let draft = BillingLedgerEntry {
                    uuid: Uuid::new_v4(),
                    job_id: job_id.to_string(),
                    api_key_id: job.api_key_id,
                    mode: ChargeMode::Target,
                    reason: reason.to_string(),
                    idempotency_key: idempotency_key.to_string(),
                    charged: 0,
                    before_used,
                    after_used: before_used,
                    before_credits: None,
                    after_credits: None,
                    charge_details: None,
                    created_at: Utc::now(),
                };
                self.ledger.insert_if_absent(&draft).await?;
                let key = self.api_keys.find_by_id(job.api_key_id).await?;
                return Ok(ChargeOutcome { charged: 0, remaining_credits: key.credits });
            }

            let delta = target_used - before_used;

            match self.jobs.compare_and_set_credits_used(job_id, before_used, target_used).await? {
                Some(updated_job) => {
                    let draft = BillingLedgerEntry {
                        uuid: Uuid::new_v4(),
                        job_id: job_id.to_string(),
                        api_key_id: job.api_key_id,
                        mode: ChargeMode::Target,
                        reason: reason.to_string(),
                        idempotency_key: idempotency_key.to_string(),
                        charged: delta,
                        before_used,
                        after_used: updated_job.credits_used,
                        before_credits: None,
                        after_credits: None,
                        charge_details: None,
                        created_at: Utc::now(),
                    };
                    self.ledger.insert_if_absent(&draft).await?;
                    let debited = self.api_keys.debit(job.api_key_id, delta).await?;

                    info!(charged = delta, remaining_credits = debited.credits, attempt, "charge_to_used applied");
                    return Ok(ChargeOutcome { charged: delta, remaining_credits: debited.credits });
                }
                None => {
                    warn!(attempt, job_id, "charge_to_used optimistic update conflicted, retrying");
                    continue;
                }
            }
        }

        Err(BillingError::OptimisticLockExhausted { attempts: CHARGE_TO_USED_MAX_RETRIES })
    }
}

fn normalize_charge_details(delta: i64, charge_details: Option<Value>) -> Option<Value> {
    match &charge_details {
        Some(Value::Object(map)) => {
            let total = map.get("total").and_then(Value::as_i64);
            let items_sum = map.get("items").and_then(Value::as_array).map(|items| {
                items.iter().filter_map(|item| item.get("amount").and_then(Value::as_i64)).sum::<i64>()
            });
            let items_match = items_sum.is_none_or(|sum| sum == delta);

            if total == Some(delta) && items_match {
                charge_details
            } else {
                Some(serde_json::json!({
                    "items": [{ "name": "unattributed_adjustment", "amount": delta }],
                    "total": delta,
                }))
            }
        }
        _ => charge_details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_charge_details_replaces_mismatched_total() {
        let details = serde_json::json!({ "total": 3, "items": [] });
        let normalized = normalize_charge_details(5, Some(details)).unwrap();
        assert_eq!(normalized["total"], 5);
        assert_eq!(normalized["items"][0]["name"], "unattributed_adjustment");
    }

    #[test]
    fn normalize_charge_details_keeps_matching_total_and_items() {
        let details = serde_json::json!({ "total": 5, "items": [{"name": "page_fetch", "amount": 5}] });
        let normalized = normalize_charge_details(5, Some(details.clone())).unwrap();
        assert_eq!(normalized, details);
    }

    #[test]
    fn normalize_charge_details_replaces_when_items_dont_sum_to_total() {
        let details = serde_json::json!({
            "total": 5,
            "items": [{"name": "page_fetch", "amount": 2}, {"name": "proxy", "amount": 2}],
        });
        let normalized = normalize_charge_details(5, Some(details)).unwrap();
        assert_eq!(normalized["total"], 5);
        assert_eq!(normalized["items"][0]["name"], "unattributed_adjustment");
    }

    #[test]
    fn normalize_charge_details_passes_through_none() {
        assert!(normalize_charge_details(5, None).is_none());
    }

    #[test]
    fn estimate_required_credits_scrape_is_flat() {
        assert_eq!(estimate_required_credits(TaskType::Scrape, &serde_json::json!({"limit": 500})), 1);
    }

    #[test]
    fn estimate_required_credits_crawl_scales_with_limit() {
        assert_eq!(estimate_required_credits(TaskType::Crawl, &serde_json::json!({"limit": 250})), 250);
    }

    #[test]
    fn estimate_required_credits_crawl_without_limit_falls_back() {
        assert_eq!(estimate_required_credits(TaskType::Crawl, &serde_json::json!({})), 10);
    }
}
