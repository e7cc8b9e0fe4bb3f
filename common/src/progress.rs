// Crawl progress tracker: ephemeral per-job counters in Redis, with one atomic
// Lua script per compound read-then-write operation so concurrent workers racing
// on the same job never corrupt a counter or double-finalize a crawl.
//
// State lives in the `crawl:{jobId}` hash; the finalize-check set
// `jobs:pending_finalize` holds job ids a periodic sweeper should re-check once
// they're close enough to their page limit that finalization is imminent.

use crate::billing::BillingEngine;
use crate::db::repositories::JobRepository;
use crate::db::RedisPool;
use crate::errors::ProgressError;
use crate::models::{CrawlProgressState, PageDoneOutcome};
use chrono::Utc;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const PENDING_FINALIZE_SET: &str = "jobs:pending_finalize";
const ENROLL_THRESHOLD_PCT: f64 = 0.9;

fn state_key(job_id: &str) -> String {
    format!("crawl:{job_id}")
}

#[async_trait::async_trait]
pub trait ProgressTracker: Send + Sync {
    async fn ensure_started(&self, job_id: &str) -> Result<(), ProgressError>;
    async fn begin_enqueue(&self, job_id: &str) -> Result<(), ProgressError>;
    async fn end_enqueue(&self, job_id: &str) -> Result<(), ProgressError>;
    async fn increment_enqueued(&self, job_id: &str, n: i64) -> Result<(), ProgressError>;

    /// Bump `done`/`succeeded|failed` atomically, apply the matching Job counter
    /// update, optionally charge per-page credits, and enroll the job for
    /// finalize-checking once it nears `limit`. `limit <= 0` means uncapped.
    async fn mark_page_done(
        &self,
        job_id: &str,
        success: bool,
        limit: i64,
        credits_per_page: i64,
    ) -> Result<PageDoneOutcome, ProgressError>;

    /// Atomically check the finalization policy and, if satisfied, mark the crawl
    /// finalized. Returns whether this call was the one that finalized it.
    async fn try_finalize(&self, job_id: &str, limit: i64) -> Result<bool, ProgressError>;

    async fn cancel(&self, job_id: &str) -> Result<(), ProgressError>;

    async fn state(&self, job_id: &str) -> Result<CrawlProgressState, ProgressError>;

    /// Job ids enrolled by `mark_page_done` as close to their finalization
    /// threshold, for a periodic sweeper to re-check with `try_finalize`.
    async fn pending_finalize_jobs(&self) -> Result<Vec<String>, ProgressError>;
}

pub struct RedisProgressTracker {
    redis: RedisPool,
    jobs: JobRepository,
    billing: Arc<dyn BillingEngine>,
    credits_enabled: bool,
}

impl RedisProgressTracker {
    pub fn new(
        redis: RedisPool,
        jobs: JobRepository,
        billing: Arc<dyn BillingEngine>,
        credits_enabled: bool,
    ) -> Self {
        Self { redis, jobs, billing, credits_enabled }
    }
}

#[async_trait::async_trait]
impl ProgressTracker for RedisProgressTracker {
    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn ensure_started(&self, job_id: &str) -> Result<(), ProgressError> {
        let mut conn = self.redis.get_connection();
        let key = state_key(job_id);
        let _: bool = conn
            .hset_nx(&key, "started_at", Utc::now().to_rfc3339())
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;
        Ok(())
    }

    async fn begin_enqueue(&self, job_id: &str) -> Result<(), ProgressError> {
        let mut conn = self.redis.get_connection();
        let key = state_key(job_id);
        let _: i64 = conn
            .hincr(&key, "enqueuing", 1)
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;
        Ok(())
    }

    /// Decrement `enqueuing` with a floor of zero, via Lua, so a spurious extra
    /// `end_enqueue` call (e.g. after a retry) can't push the counter negative and
    /// make `try_finalize`'s queue-drained check pass prematurely... or never.
    async fn end_enqueue(&self, job_id: &str) -> Result<(), ProgressError> {
        let mut conn = self.redis.get_connection();
        let key = state_key(job_id);

        let script = r#"
            local cur = tonumber(redis.call("HGET", KEYS[1], "enqueuing") or "0")
            if cur > 0 then
                redis.call("HINCRBY", KEYS[1], "enqueuing", -1)
            end
            return 1
        "#;

        let _: i64 = redis::Script::new(script)
            .key(&key)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;
        Ok(())
    }

    /// Atomically bump `enqueued` and ensure `started_at` is set, in one script so a
    /// crawl that enqueues before its first `ensure_started` call still gets a start
    /// time recorded.
    async fn increment_enqueued(&self, job_id: &str, n: i64) -> Result<(), ProgressError> {
        let mut conn = self.redis.get_connection();
        let key = state_key(job_id);

        let script = r#"
            redis.call("HSETNX", KEYS[1], "started_at", ARGV[2])
            redis.call("HINCRBY", KEYS[1], "enqueued", ARGV[1])
            return 1
        "#;

        let _: i64 = redis::Script::new(script)
            .key(&key)
            .arg(n)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %job_id, success))]
    async fn mark_page_done(
        &self,
        job_id: &str,
        success: bool,
        limit: i64,
        credits_per_page: i64,
    ) -> Result<PageDoneOutcome, ProgressError> {
        let mut conn = self.redis.get_connection();
        let key = state_key(job_id);

        // Checked before increment: once finalized or cancelled, no further call may
        // move the done/succeeded/failed counters, so a crawl's worker loop can't keep
        // billing and mutating progress after `DELETE /v1/crawl/{jobId}`.
        let script = r#"
            local finalized = tonumber(redis.call("HGET", KEYS[1], "finalized") or "0")
            local cancelled = tonumber(redis.call("HGET", KEYS[1], "cancelled") or "0")
            local enqueued = tonumber(redis.call("HGET", KEYS[1], "enqueued") or "0")
            if finalized == 1 or cancelled == 1 then
                local done = tonumber(redis.call("HGET", KEYS[1], "done") or "0")
                local succeeded = tonumber(redis.call("HGET", KEYS[1], "succeeded") or "0")
                local failed = tonumber(redis.call("HGET", KEYS[1], "failed") or "0")
                return {done, enqueued, succeeded, failed, 1}
            end

            redis.call("HINCRBY", KEYS[1], "done", 1)
            if ARGV[1] == "1" then
                redis.call("HINCRBY", KEYS[1], "succeeded", 1)
            else
                redis.call("HINCRBY", KEYS[1], "failed", 1)
            end
            local done = tonumber(redis.call("HGET", KEYS[1], "done"))
            local succeeded = tonumber(redis.call("HGET", KEYS[1], "succeeded") or "0")
            local failed = tonumber(redis.call("HGET", KEYS[1], "failed") or "0")
            return {done, enqueued, succeeded, failed, 0}
        "#;

        let (done, enqueued, succeeded, failed, stopped): (i64, i64, i64, i64, i64) =
            redis::Script::new(script)
                .key(&key)
                .arg(if success { "1" } else { "0" })
                .invoke_async(&mut conn)
                .await
                .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;

        let stopped = stopped == 1;
        let outcome = PageDoneOutcome { done, enqueued, succeeded, failed, stopped };

        if stopped {
            return Ok(outcome);
        }

        let (completed_delta, failed_delta) = if success { (1, 0) } else { (0, 1) };
        self.jobs.increment_progress(job_id, completed_delta, failed_delta).await?;

        // First page funds the crawl up-front via chargeToUsed at dispatch time; only
        // pages after it are billed incrementally here.
        if self.credits_enabled && success && limit > 0 && done > 1 && done <= limit {
            let idempotency_key = format!("crawl:page-success:{job_id}:{done}");
            if let Err(e) = self
                .billing
                .charge_delta(job_id, credits_per_page, "crawl_page", &idempotency_key, None)
                .await
            {
                warn!(job_id, done, error = %e, "per-page billing failed");
            }
        }

        if limit > 0 && (done as f64) >= (limit as f64) * ENROLL_THRESHOLD_PCT {
            let mut conn = self.redis.get_connection();
            let _: i64 = conn
                .sadd(PENDING_FINALIZE_SET, job_id)
                .await
                .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;
        }

        Ok(outcome)
    }

    #[instrument(skip(self), fields(job_id = %job_id, limit))]
    async fn try_finalize(&self, job_id: &str, limit: i64) -> Result<bool, ProgressError> {
        let mut conn = self.redis.get_connection();
        let key = state_key(job_id);

        let script = r#"
            local finalized = tonumber(redis.call("HGET", KEYS[1], "finalized") or "0")
            if finalized == 1 then
                return 0
            end

            local limit = tonumber(ARGV[1])
            local done = tonumber(redis.call("HGET", KEYS[1], "done") or "0")
            local enqueued = tonumber(redis.call("HGET", KEYS[1], "enqueued") or "0")
            local enqueuing = tonumber(redis.call("HGET", KEYS[1], "enqueuing") or "0")

            local reached_limit = (limit > 0) and (done >= limit)
            local queue_drained = (enqueued > 0) and (done == enqueued) and (enqueuing == 0)

            if reached_limit or queue_drained then
                redis.call("HSET", KEYS[1], "finalized", "1", "finished_at", ARGV[2])
                return 1
            end
            return 0
        "#;

        let finalized: i64 = redis::Script::new(script)
            .key(&key)
            .arg(limit)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;

        if finalized == 1 {
            info!(job_id, "crawl finalized");
            let _: i64 = conn
                .srem(PENDING_FINALIZE_SET, job_id)
                .await
                .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;
        }

        Ok(finalized == 1)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    async fn cancel(&self, job_id: &str) -> Result<(), ProgressError> {
        let mut conn = self.redis.get_connection();
        let key = state_key(job_id);

        let script = r#"
            local finalized = tonumber(redis.call("HGET", KEYS[1], "finalized") or "0")
            if finalized == 1 then
                return 0
            end
            redis.call("HSET", KEYS[1], "cancelled", "1", "finalized", "1", "finished_at", ARGV[1])
            return 1
        "#;

        let _: i64 = redis::Script::new(script)
            .key(&key)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;

        let _: i64 = conn
            .srem(PENDING_FINALIZE_SET, job_id)
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;

        Ok(())
    }

    async fn state(&self, job_id: &str) -> Result<CrawlProgressState, ProgressError> {
        let mut conn = self.redis.get_connection();
        let key = state_key(job_id);

        let raw: std::collections::HashMap<String, String> = conn
            .hgetall(&key)
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;

        if raw.is_empty() {
            return Err(ProgressError::NotFound(job_id.to_string()));
        }

        Ok(parse_state(&raw))
    }

    async fn pending_finalize_jobs(&self) -> Result<Vec<String>, ProgressError> {
        let mut conn = self.redis.get_connection();
        let job_ids: Vec<String> = conn
            .smembers(PENDING_FINALIZE_SET)
            .await
            .map_err(|e| crate::errors::StorageError::Redis(e.to_string()))?;
        Ok(job_ids)
    }
}

fn parse_state(raw: &std::collections::HashMap<String, String>) -> CrawlProgressState {
    let get_i64 = |field: &str| raw.get(field).and_then(|v| v.parse::<i64>().ok()).unwrap_or(0);
    let get_bool = |field: &str| raw.get(field).map(|v| v == "1").unwrap_or(false);
    let get_time = |field: &str| {
        raw.get(field).and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok()).map(|d| d.with_timezone(&Utc))
    };

    CrawlProgressState {
        enqueued: get_i64("enqueued"),
        done: get_i64("done"),
        succeeded: get_i64("succeeded"),
        failed: get_i64("failed"),
        enqueuing: get_i64("enqueuing"),
        finalized: get_bool("finalized"),
        cancelled: get_bool("cancelled"),
        started_at: get_time("started_at"),
        finished_at: get_time("finished_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_state_defaults_missing_fields_to_zero() {
        let raw = std::collections::HashMap::new();
        let state = parse_state(&raw);
        assert_eq!(state.done, 0);
        assert!(!state.finalized);
        assert!(state.started_at.is_none());
    }

    #[test]
    fn parse_state_reads_counters_and_flags() {
        let mut raw = std::collections::HashMap::new();
        raw.insert("done".to_string(), "7".to_string());
        raw.insert("enqueued".to_string(), "10".to_string());
        raw.insert("finalized".to_string(), "1".to_string());
        let state = parse_state(&raw);
        assert_eq!(state.done, 7);
        assert_eq!(state.enqueued, 10);
        assert!(state.finalized);
    }

    #[test]
    fn state_key_has_crawl_prefix() {
        assert_eq!(state_key("job-123"), "crawl:job-123");
    }
}
