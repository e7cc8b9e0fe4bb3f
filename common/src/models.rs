// Domain model: scheduled tasks, executions, queue-visible jobs, caches, and billing ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies the owning API key and, optionally, the end user that configured a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    pub api_key_id: Uuid,
    pub user_id: Option<Uuid>,
}

/// What kind of work a scheduled task produces when it fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Scrape,
    Crawl,
    Search,
    Map,
    Template,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskType::Scrape => "scrape",
            TaskType::Crawl => "crawl",
            TaskType::Search => "search",
            TaskType::Map => "map",
            TaskType::Template => "template",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scrape" => Ok(TaskType::Scrape),
            "crawl" => Ok(TaskType::Crawl),
            "search" => Ok(TaskType::Search),
            "map" => Ok(TaskType::Map),
            "template" => Ok(TaskType::Template),
            other => Err(format!("unknown task_type '{other}'")),
        }
    }
}

/// Whether a new trigger firing while a prior execution is still active is skipped or queued.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    Skip,
    Queue,
}

/// A user-configured recurring task, driven by a cron expression in its own timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub uuid: Uuid,
    pub owner: Owner,
    pub name: String,
    pub description: Option<String>,
    pub cron_expression: String,
    pub timezone: String,
    pub task_type: TaskType,
    pub task_payload: Value,
    pub concurrency_mode: ConcurrencyMode,
    pub max_executions_per_day: Option<i32>,
    pub min_credits_required: i64,
    pub is_active: bool,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub last_execution_at: Option<DateTime<Utc>>,
    pub total_executions: i64,
    pub successful_executions: i64,
    pub failed_executions: i64,
    pub consecutive_failures: i32,
    pub tags: Vec<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledTask {
    /// A task is eligible to fire only while active and not paused.
    pub fn is_eligible(&self) -> bool {
        self.is_active && !self.is_paused
    }

    /// Five consecutive failures trip the auto-pause per trigger pipeline policy.
    pub const AUTO_PAUSE_THRESHOLD: i32 = 5;

    pub fn should_auto_pause(&self) -> bool {
        self.consecutive_failures >= Self::AUTO_PAUSE_THRESHOLD
    }
}

/// Who or what caused a task execution to be created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduler,
    Manual,
    System,
}

/// Lifecycle state of a task execution. Once terminal, never rewritten.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One firing of a `ScheduledTask`. `idempotency_key` is unique and prevents duplicate
/// firings for the same cron tick from being double-triggered by a racing reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub uuid: Uuid,
    pub scheduled_task_uuid: Uuid,
    pub execution_number: i64,
    pub idempotency_key: String,
    pub status: ExecutionStatus,
    pub scheduled_for: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub triggered_by: TriggerSource,
    pub job_uuid: Option<Uuid>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub error_details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskExecution {
    /// Allocate the idempotency key the trigger pipeline uses: `{task_uuid}-{epoch_ms}`.
    pub fn idempotency_key_for(task_uuid: Uuid, fired_at: DateTime<Utc>) -> String {
        format!("{}-{}", task_uuid, fired_at.timestamp_millis())
    }
}

/// Current processing state of a queue-visible job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// A unit of extraction work visible on the queue: a single scrape, or the umbrella
/// record for a crawl/search/map whose pages are tracked by the progress tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub uuid: Uuid,
    pub job_id: String,
    pub api_key_id: Uuid,
    pub job_type: TaskType,
    pub job_queue_name: String,
    pub url: String,
    pub payload: Value,
    pub origin: TriggerSource,
    pub status: JobStatus,
    pub is_success: Option<bool>,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub credits_used: i64,
    pub deducted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expire_at: DateTime<Utc>,
}

impl Job {
    /// Queue name convention: `{task_type}-{engine}`, e.g. `scrape-cheerio`.
    pub fn queue_name(task_type: TaskType, engine: &str) -> String {
        format!("{task_type}-{engine}")
    }
}

/// One page-level outcome appended while a job runs. Append-only, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub uuid: Uuid,
    pub job_uuid: Uuid,
    pub url: String,
    pub success: bool,
    pub status_code: Option<i32>,
    pub error_message: Option<String>,
    pub page_cache_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A cached single-page fetch, content-addressed by `(url_hash, options_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageCache {
    pub uuid: Uuid,
    pub url_hash: String,
    pub options_hash: String,
    pub domain: String,
    pub content_hash: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status_code: i32,
    pub content_type: Option<String>,
    pub content_length: i64,
    pub engine: String,
    pub has_proxy: bool,
    pub has_screenshot: bool,
    pub scraped_at: DateTime<Utc>,
    pub object_store_key: String,
}

/// Which discovery mechanism populated a `MapCache` row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MapSource {
    Sitemap,
    Search,
    Crawl,
    Combined,
}

/// Cached URL discovery result for a domain, keyed by `(domain_hash, source)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapCache {
    pub uuid: Uuid,
    pub domain_hash: String,
    pub domain: String,
    pub source: MapSource,
    pub urls: Vec<String>,
    pub titles: Option<Vec<Option<String>>>,
    pub descriptions: Option<Vec<Option<String>>>,
    pub discovered_at: DateTime<Utc>,
}

/// Billing mode: `delta` charges an incremental amount, `target` brings `credits_used`
/// up to an absolute value (never refunding if the target is behind current usage).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChargeMode {
    Delta,
    Target,
}

/// One append-only billing event. `idempotency_key` is unique; retrying a charge with
/// the same key is a no-op rather than a double-debit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingLedgerEntry {
    pub uuid: Uuid,
    pub job_id: String,
    pub api_key_id: Uuid,
    pub mode: ChargeMode,
    pub reason: String,
    pub idempotency_key: String,
    pub charged: i64,
    pub before_used: i64,
    pub after_used: i64,
    pub before_credits: Option<i64>,
    pub after_credits: Option<i64>,
    pub charge_details: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// The subset of an API key's billing state the billing engine reads and writes.
/// `tier` drives the scheduler's subscription-limit enforcement pass and defaults to
/// `"free"` for keys provisioned before tiers existed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKey {
    pub id: Uuid,
    pub credits: i64,
    pub tier: String,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Ephemeral per-crawl counters kept in the shared KV store, keyed by job id.
/// Not persisted to Postgres; rebuilt or abandoned on restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlProgressState {
    pub enqueued: i64,
    pub done: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub enqueuing: i64,
    pub finalized: bool,
    pub cancelled: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Outcome of `MarkPageDone`: counters observed after applying the increment, used by
/// the caller to decide whether per-page billing or finalize-enrollment should happen.
#[derive(Debug, Clone, Copy)]
pub struct PageDoneOutcome {
    pub done: i64,
    pub enqueued: i64,
    pub succeeded: i64,
    pub failed: i64,
    /// Set when the crawl was already finalized/cancelled, so this call was a
    /// no-op and counters above reflect the pre-existing snapshot, not an increment.
    pub stopped: bool,
}

/// Summary persisted once a crawl finalizes, independent of the ephemeral counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub job_id: String,
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A reusable task definition a `ScheduledTask` can point at instead of embedding its
/// own `task_type`/`task_payload`; resolved at trigger time, not registration time, so
/// edits to the template take effect on the next firing without editing every task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub uuid: Uuid,
    pub api_key_id: Uuid,
    pub name: String,
    pub task_type: TaskType,
    pub task_payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Events emitted to the configured webhook sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WebhookEvent {
    TaskExecuted { task_uuid: Uuid, execution_uuid: Uuid },
    TaskFailed { task_uuid: Uuid, execution_uuid: Uuid, reason: String },
    TaskPaused { task_uuid: Uuid, reason: String },
    TaskResumed { task_uuid: Uuid },
    ScrapeCompleted { job_id: String },
    ScrapeFailed { job_id: String, reason: String },
    CrawlCompleted { job_id: String, summary: CrawlSummary },
    CrawlFailed { job_id: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_display_and_from_str() {
        for t in [
            TaskType::Scrape,
            TaskType::Crawl,
            TaskType::Search,
            TaskType::Map,
            TaskType::Template,
        ] {
            let s = t.to_string();
            assert_eq!(TaskType::from_str(&s).unwrap(), t);
        }
    }

    #[test]
    fn execution_status_terminal_states() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
    }

    #[test]
    fn scheduled_task_eligibility_requires_active_and_unpaused() {
        let mut task = sample_task();
        assert!(task.is_eligible());
        task.is_paused = true;
        assert!(!task.is_eligible());
        task.is_paused = false;
        task.is_active = false;
        assert!(!task.is_eligible());
    }

    #[test]
    fn auto_pause_trips_at_five_consecutive_failures() {
        let mut task = sample_task();
        task.consecutive_failures = 4;
        assert!(!task.should_auto_pause());
        task.consecutive_failures = 5;
        assert!(task.should_auto_pause());
    }

    #[test]
    fn idempotency_key_is_deterministic_for_task_and_fire_time() {
        let task_uuid = Uuid::new_v4();
        let t = Utc::now();
        let key1 = TaskExecution::idempotency_key_for(task_uuid, t);
        let key2 = TaskExecution::idempotency_key_for(task_uuid, t);
        assert_eq!(key1, key2);
        assert!(key1.starts_with(&task_uuid.to_string()));
    }

    #[test]
    fn job_queue_name_combines_type_and_engine() {
        assert_eq!(Job::queue_name(TaskType::Scrape, "cheerio"), "scrape-cheerio");
    }

    fn sample_task() -> ScheduledTask {
        ScheduledTask {
            uuid: Uuid::new_v4(),
            owner: Owner { api_key_id: Uuid::new_v4(), user_id: None },
            name: "test".into(),
            description: None,
            cron_expression: "0 * * * * *".into(),
            timezone: "UTC".into(),
            task_type: TaskType::Scrape,
            task_payload: serde_json::json!({}),
            concurrency_mode: ConcurrencyMode::Skip,
            max_executions_per_day: None,
            min_credits_required: 0,
            is_active: true,
            is_paused: false,
            pause_reason: None,
            next_execution_at: None,
            last_execution_at: None,
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            consecutive_failures: 0,
            tags: vec![],
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
