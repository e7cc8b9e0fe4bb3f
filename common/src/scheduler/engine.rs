// Scheduler engine: polls scheduled_tasks on a fixed interval under a distributed lock
// and fires any task whose cron schedule is due, generalizing the teacher's poll loop
// into the full trigger pipeline: template resolution, credit gate, concurrency gate,
// daily cap, transactional execution+job creation, and auto-pause bookkeeping.

use crate::billing::{estimate_required_credits, BillingEngine};
use crate::config::{EngineConfig, SchedulerConfig, TierLimitsConfig};
use crate::db::repositories::{
    ApiKeyRepository, JobRepository, ScheduledTaskRepository, TaskExecutionRepository, TemplateRepository,
};
use crate::db::DbPool;
use crate::errors::ScheduleError;
use crate::models::{Job, JobStatus, ScheduledTask, TaskExecution, TaskType, TriggerSource, WebhookEvent};
use crate::queue::publisher::JobPublisher;
use crate::schedule::calculate_cron_next_execution;
use crate::scheduler::reconcile::{enforce_tier_limits, record_task_failure, sweep_stale_executions};
use crate::sync_exec::SyncTaskExecutor;
use crate::webhook::WebhookEmitter;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const PUBLISH_RETRIES: u32 = 3;
const JOB_EXPIRY_DAYS: i64 = 7;

/// Collaborators the trigger pipeline and reconciliation loop share, bundled so
/// `SchedulerEngine` doesn't carry a dozen constructor parameters.
#[derive(Clone)]
pub struct SchedulerDeps {
    pub db: DbPool,
    pub tasks: ScheduledTaskRepository,
    pub executions: TaskExecutionRepository,
    pub jobs: JobRepository,
    pub api_keys: ApiKeyRepository,
    pub templates: TemplateRepository,
    pub billing: Arc<dyn BillingEngine>,
    pub publisher: Arc<dyn JobPublisher>,
    pub lock: Arc<dyn crate::lock::DistributedLock>,
    pub sync_executor: Arc<dyn SyncTaskExecutor>,
    pub webhooks: Arc<dyn WebhookEmitter>,
    pub webhook_target: Option<String>,
    pub engine_config: EngineConfig,
    pub tiers: TierLimitsConfig,
}

/// What happened when a due task was evaluated, surfaced for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Fired,
    SkippedConcurrent,
    SkippedDailyCap,
    SkippedDuplicateTick,
    PausedInsufficientCredits,
    StoppedMissingApiKey,
    StoppedMissingTemplate,
}

pub struct SchedulerEngine {
    deps: SchedulerDeps,
    config: SchedulerConfig,
}

impl SchedulerEngine {
    pub fn new(deps: SchedulerDeps, config: SchedulerConfig) -> Self {
        Self { deps, config }
    }

    /// Runs the poll loop until the process is killed. Each tick takes the poll lock so
    /// only one scheduler replica drives triggers at a time.
    pub async fn run_forever(&self) {
        let mut interval = tokio::time::interval(StdDuration::from_secs(self.config.poll_interval_seconds));
        loop {
            interval.tick().await;
            if let Err(err) = self.run_once().await {
                warn!(error = %err, "scheduler poll cycle failed");
            }
        }
    }

    /// One full poll cycle: trigger due tasks, sweep stale executions, enforce tier
    /// limits. Guarded by a distributed lock so only one replica runs it concurrently.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<(), ScheduleError> {
        let ttl = StdDuration::from_secs(self.config.lock_ttl_seconds);
        let _guard = self
            .deps
            .lock
            .acquire("scheduler:poll:lock", ttl)
            .await
            .map_err(|e| ScheduleError::LockFailed(e.to_string()))?;

        let now = Utc::now();
        let due = self.due_tasks(now).await?;

        for task in due {
            match self.trigger_task(&task, now).await {
                Ok(outcome) => info!(task_uuid = %task.uuid, ?outcome, "trigger pipeline evaluated"),
                Err(err) => warn!(task_uuid = %task.uuid, error = %err, "trigger pipeline failed"),
            }
        }

        let stale = sweep_stale_executions(&self.deps.executions, &self.deps.jobs, &self.deps.tasks, now)
            .await
            .map_err(ScheduleError::Database)?;
        if stale.failed_executions > 0 || stale.failed_crawl_jobs > 0 {
            info!(
                failed_executions = stale.failed_executions,
                failed_crawl_jobs = stale.failed_crawl_jobs,
                "stale execution sweep completed"
            );
        }

        let paused = enforce_tier_limits(&self.deps.tasks, &self.deps.api_keys, &self.deps.tiers)
            .await
            .map_err(ScheduleError::Database)?;
        if paused > 0 {
            info!(paused, "tier limit enforcement paused tasks over their subscription's active-task limit");
        }

        Ok(())
    }

    async fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledTask>, ScheduleError> {
        let eligible = self.deps.tasks.find_eligible().await.map_err(ScheduleError::Database)?;
        let due = eligible
            .into_iter()
            .filter(|t| t.next_execution_at.is_none_or(|next| next <= now))
            .take(self.config.max_tasks_per_poll as usize)
            .collect();
        Ok(due)
    }

    /// The full per-task trigger pipeline from the reconciliation design: resolve
    /// template, check credits, check concurrency/daily-cap gates, fire a transactional
    /// execution+job pair, advance the cron schedule, and emit the matching webhook.
    #[instrument(skip(self, task), fields(task_uuid = %task.uuid))]
    pub async fn trigger_task(
        &self,
        task: &ScheduledTask,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome, ScheduleError> {
        let (effective_type, effective_payload) = match self.resolve_effective_task(task).await? {
            Some(resolved) => resolved,
            None => {
                self.stop_task(task, "referenced template no longer exists").await?;
                return Ok(TriggerOutcome::StoppedMissingTemplate);
            }
        };

        let api_key = match self.deps.api_keys.find_by_id(task.owner.api_key_id).await {
            Ok(key) => key,
            Err(_) => {
                self.stop_task(task, "owning api key no longer exists").await?;
                return Ok(TriggerOutcome::StoppedMissingApiKey);
            }
        };

        let required_credits =
            task.min_credits_required.max(estimate_required_credits(effective_type, &effective_payload));
        if api_key.credits < required_credits {
            self.pause_task(task, "insufficient credits for next firing").await?;
            return Ok(TriggerOutcome::PausedInsufficientCredits);
        }

        if task.concurrency_mode == crate::models::ConcurrencyMode::Skip
            && self.deps.executions.has_active_execution(task.uuid).await.map_err(ScheduleError::Database)?
        {
            self.reschedule(task, now).await?;
            return Ok(TriggerOutcome::SkippedConcurrent);
        }

        if let Some(max_per_day) = task.max_executions_per_day {
            let fired_today =
                self.deps.executions.count_today(task.uuid).await.map_err(ScheduleError::Database)?;
            if fired_today >= max_per_day as i64 {
                self.reschedule(task, now).await?;
                return Ok(TriggerOutcome::SkippedDailyCap);
            }
        }

        let idempotency_key = TaskExecution::idempotency_key_for(task.uuid, now);
        if self
            .deps
            .executions
            .find_by_idempotency_key(&idempotency_key)
            .await
            .map_err(ScheduleError::Database)?
            .is_some()
        {
            return Ok(TriggerOutcome::SkippedDuplicateTick);
        }

        self.fire(task, effective_type, &effective_payload, &idempotency_key, now).await?;
        self.reschedule_after_firing(task, now).await?;
        self.emit(WebhookEvent::TaskExecuted { task_uuid: task.uuid, execution_uuid: Uuid::new_v4() }).await;

        Ok(TriggerOutcome::Fired)
    }

    /// `None` means the task points at a template that no longer resolves and should
    /// be stopped by the caller.
    async fn resolve_effective_task(
        &self,
        task: &ScheduledTask,
    ) -> Result<Option<(TaskType, Value)>, ScheduleError> {
        if task.task_type != TaskType::Template {
            return Ok(Some((task.task_type, task.task_payload.clone())));
        }

        let Some(template_id) =
            task.task_payload.get("template_id").and_then(Value::as_str).and_then(|s| Uuid::parse_str(s).ok())
        else {
            return Ok(None);
        };

        match self.deps.templates.find_by_uuid(template_id).await {
            Ok(template) => Ok(Some((template.task_type, template.task_payload))),
            Err(_) => Ok(None),
        }
    }

    /// Create the `TaskExecution`/`Job` pair atomically and dispatch the job: queue
    /// types publish to their `(task_type, engine)` queue for a worker to pick up;
    /// `search`/`map` run inline here instead, per the synchronous task type rule.
    async fn fire(
        &self,
        task: &ScheduledTask,
        effective_type: TaskType,
        effective_payload: &Value,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let (job, execution) = self.create_job_and_execution(task, effective_type, effective_payload, idempotency_key, now).await?;

        if matches!(effective_type, TaskType::Search | TaskType::Map) {
            self.run_sync_task(task, effective_type, effective_payload, &job, &execution).await?;
            return Ok(());
        }

        if let Err(err) = self.deps.publisher.publish_with_retry(&job, 0, PUBLISH_RETRIES).await {
            warn!(job_id = %job.job_id, error = %err, "job committed but queue publish failed, worker poll will pick it up late");
        }

        Ok(())
    }

    async fn create_job_and_execution(
        &self,
        task: &ScheduledTask,
        effective_type: TaskType,
        effective_payload: &Value,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(Job, TaskExecution), ScheduleError> {
        let mut tx = self
            .deps
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| ScheduleError::Database(crate::errors::DatabaseError::from(e)))?;

        let url = effective_payload.get("url").and_then(Value::as_str).unwrap_or_default().to_string();
        let engine_name = effective_payload.get("engine").and_then(Value::as_str).unwrap_or("cheerio");
        let execution_number = task.total_executions + 1;

        let job_draft = Job {
            uuid: Uuid::new_v4(),
            job_id: format!("{}-{}", task.uuid, execution_number),
            api_key_id: task.owner.api_key_id,
            job_type: effective_type,
            job_queue_name: Job::queue_name(effective_type, engine_name),
            url,
            payload: effective_payload.clone(),
            origin: TriggerSource::Scheduler,
            status: JobStatus::Pending,
            is_success: None,
            total: 0,
            completed: 0,
            failed: 0,
            credits_used: 0,
            deducted_at: None,
            created_at: now,
            updated_at: now,
            expire_at: now + Duration::days(JOB_EXPIRY_DAYS),
        };
        let job = self.deps.jobs.create_tx(&mut tx, &job_draft).await.map_err(ScheduleError::Database)?;

        let execution_draft = TaskExecution {
            uuid: Uuid::new_v4(),
            scheduled_task_uuid: task.uuid,
            execution_number,
            idempotency_key: idempotency_key.to_string(),
            status: crate::models::ExecutionStatus::Pending,
            scheduled_for: now,
            started_at: None,
            completed_at: None,
            triggered_by: TriggerSource::Scheduler,
            job_uuid: Some(job.uuid),
            error_message: None,
            error_code: None,
            error_details: None,
            created_at: now,
            updated_at: now,
        };
        self.deps.executions.create_tx(&mut tx, &execution_draft).await.map_err(ScheduleError::Database)?;

        tx.commit().await.map_err(|e| ScheduleError::Database(crate::errors::DatabaseError::from(e)))?;

        Ok((job, execution_draft))
    }

    /// Runs a `search`/`map` task inline: no queue, no engine worker, no crawl
    /// progress tracker. The Job still gets a uniform completed/failed outcome so
    /// accounting (billing, webhook, task counters) matches the queued path.
    async fn run_sync_task(
        &self,
        task: &ScheduledTask,
        effective_type: TaskType,
        effective_payload: &Value,
        job: &Job,
        execution: &TaskExecution,
    ) -> Result<(), ScheduleError> {
        let limit = effective_payload.get("limit").and_then(Value::as_i64).filter(|n| *n > 0);

        let outcome = match effective_type {
            TaskType::Map => self.deps.sync_executor.execute_map(&job.url, limit).await,
            TaskType::Search => {
                let query = effective_payload.get("query").and_then(Value::as_str).unwrap_or(&job.url);
                self.deps.sync_executor.execute_search(query, limit).await
            }
            _ => unreachable!("run_sync_task only called for search/map"),
        };

        match outcome {
            Ok(result) => {
                self.deps.jobs.set_total(&job.job_id, result.total).await.map_err(ScheduleError::Database)?;
                self.deps
                    .jobs
                    .increment_progress(&job.job_id, result.succeeded, result.failed)
                    .await
                    .map_err(ScheduleError::Database)?;
                self.deps
                    .jobs
                    .update_status(&job.job_id, JobStatus::Completed, Some(true))
                    .await
                    .map_err(ScheduleError::Database)?;

                if let Err(err) = self
                    .deps
                    .billing
                    .charge_to_used(&job.job_id, result.succeeded.max(1), "sync_task_completed", &execution.idempotency_key)
                    .await
                {
                    warn!(job_id = %job.job_id, error = %err, "sync task billing failed");
                }

                self.complete_execution(execution, None).await?;
                self.record_execution_outcome(task, true).await?;
                self.emit(WebhookEvent::ScrapeCompleted { job_id: job.job_id.clone() }).await;
            }
            Err(err) => {
                let reason = err.to_string();
                self.deps
                    .jobs
                    .update_status(&job.job_id, JobStatus::Failed, Some(false))
                    .await
                    .map_err(ScheduleError::Database)?;

                self.complete_execution(execution, Some(&reason)).await?;
                self.record_execution_outcome(task, false).await?;
                self.emit(WebhookEvent::ScrapeFailed { job_id: job.job_id.clone(), reason }).await;
            }
        }

        Ok(())
    }

    async fn complete_execution(&self, execution: &TaskExecution, error: Option<&str>) -> Result<(), ScheduleError> {
        let mut updated = execution.clone();
        updated.status = if error.is_some() { crate::models::ExecutionStatus::Failed } else { crate::models::ExecutionStatus::Completed };
        updated.completed_at = Some(Utc::now());
        updated.error_message = error.map(str::to_string);
        self.deps.executions.update(&updated).await.map_err(ScheduleError::Database)
    }

    /// Advance `next_execution_at`/bookkeeping after a firing; doesn't touch
    /// `consecutive_failures`, which only the execution's eventual completion affects.
    async fn reschedule_after_firing(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let mut updated = task.clone();
        updated.total_executions += 1;
        updated.last_execution_at = Some(now);
        updated.next_execution_at =
            Some(calculate_cron_next_execution(&task.cron_expression, &task.timezone, now)?);
        self.deps.tasks.update(&updated).await.map_err(ScheduleError::Database)
    }

    /// Advance `next_execution_at` without counting a firing, used when a tick is
    /// skipped by the concurrency or daily-cap gate.
    async fn reschedule(&self, task: &ScheduledTask, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let mut updated = task.clone();
        updated.next_execution_at =
            Some(calculate_cron_next_execution(&task.cron_expression, &task.timezone, now)?);
        self.deps.tasks.update(&updated).await.map_err(ScheduleError::Database)
    }

    async fn pause_task(&self, task: &ScheduledTask, reason: &str) -> Result<(), ScheduleError> {
        self.deps.tasks.pause(task.uuid, reason).await.map_err(ScheduleError::Database)?;
        self.emit(WebhookEvent::TaskPaused { task_uuid: task.uuid, reason: reason.to_string() }).await;
        Ok(())
    }

    async fn stop_task(&self, task: &ScheduledTask, reason: &str) -> Result<(), ScheduleError> {
        let mut updated = task.clone();
        updated.is_active = false;
        updated.pause_reason = Some(reason.to_string());
        self.deps.tasks.update(&updated).await.map_err(ScheduleError::Database)?;
        warn!(task_uuid = %task.uuid, reason, "task auto-stopped");
        Ok(())
    }

    /// Records the outcome of a completed execution: bumps `successful_executions` or
    /// `consecutive_failures`, auto-pausing the task once the latter trips the threshold.
    /// Called by the worker pool once it finishes processing a job's execution.
    #[instrument(skip(self, task))]
    pub async fn record_execution_outcome(&self, task: &ScheduledTask, succeeded: bool) -> Result<(), ScheduleError> {
        let updated = if succeeded {
            let mut updated = task.clone();
            updated.successful_executions += 1;
            updated.consecutive_failures = 0;
            self.deps.tasks.update(&updated).await.map_err(ScheduleError::Database)?;
            updated
        } else {
            record_task_failure(&self.deps.tasks, task).await.map_err(ScheduleError::Database)?
        };

        if !succeeded && updated.should_auto_pause() {
            self.pause_task(&updated, "auto-paused after repeated consecutive failures").await?;
        }

        Ok(())
    }

    async fn emit(&self, event: WebhookEvent) {
        let target = self.deps.webhook_target.as_deref();
        if let Err(err) = crate::webhook::emit_to_target(self.deps.webhooks.as_ref(), target, &event).await {
            warn!(error = %err, "webhook emission failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> ScheduledTask {
        ScheduledTask {
            uuid: Uuid::new_v4(),
            owner: crate::models::Owner { api_key_id: Uuid::new_v4(), user_id: None },
            name: "every minute".into(),
            description: None,
            cron_expression: "0 * * * * *".into(),
            timezone: "UTC".into(),
            task_type: TaskType::Scrape,
            task_payload: serde_json::json!({ "url": "https://example.com" }),
            concurrency_mode: crate::models::ConcurrencyMode::Skip,
            max_executions_per_day: None,
            min_credits_required: 1,
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

    #[test]
    fn required_credits_takes_the_larger_of_floor_and_estimate() {
        let task = sample_task();
        let required = task
            .min_credits_required
            .max(estimate_required_credits(TaskType::Crawl, &serde_json::json!({ "limit": 3 })));
        assert_eq!(required, 3);

        let required_floor =
            task.min_credits_required.max(estimate_required_credits(TaskType::Scrape, &serde_json::json!({})));
        assert_eq!(required_floor, 1);
    }

    #[test]
    fn job_draft_queue_name_follows_task_type_and_engine_convention() {
        let task = sample_task();
        let queue_name = Job::queue_name(task.task_type, "cheerio");
        assert_eq!(queue_name, "scrape-cheerio");
    }
}
