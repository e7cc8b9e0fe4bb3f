// Reconciliation sweep: stale execution cleanup run from the scheduler's poll loop,
// alongside SyncFromDatabase and subscription-tier enforcement (see engine.rs).

use crate::db::repositories::{ApiKeyRepository, JobRepository, ScheduledTaskRepository, TaskExecutionRepository};
use crate::errors::DatabaseError;
use crate::models::{ExecutionStatus, JobStatus, ScheduledTask, TaskExecution};
use chrono::{DateTime, Duration, Utc};
use tracing::{instrument, warn};

pub const STALE_PENDING_TIMEOUT: &str = "STALE_PENDING_TIMEOUT";
pub const STALE_PENDING_STARTED: &str = "STALE_PENDING_STARTED";
pub const STALE_RUNNING_NO_START: &str = "STALE_RUNNING_NO_START";
/// Literal code the per-type runtime-cap and crawl-inactivity timeouts report, per
/// `spec.md` §7 ("per-type timeouts → execution failure with `EXECUTION_TIMEOUT` and
/// specific reason"); the distinguishing case goes in `error_details.reason`.
pub const EXECUTION_TIMEOUT_CODE: &str = "EXECUTION_TIMEOUT";
pub const REASON_CRAWL_INACTIVE: &str = "crawl_inactivity";

const PENDING_NO_START_MINUTES: i64 = 5;
const PENDING_STARTED_MINUTES: i64 = 5;
const RUNNING_NO_START_MINUTES: i64 = 10;
const CRAWL_INACTIVITY_MINUTES: i64 = 60;

/// Runtime caps per job type, per the stale execution cleanup table: `(job_type, cap_minutes)`.
const RUNTIME_CAPS: [(&str, i64); 3] = [("scrape", 30), ("search", 60), ("map", 30)];

#[derive(Debug, Default, Clone, Copy)]
pub struct StaleSweepReport {
    pub failed_executions: usize,
    pub failed_crawl_jobs: usize,
}

/// Fails executions abandoned per the reconciliation timeout table: pending with no
/// worker pickup, pending started but never progressing, running with no start, running
/// past its type's runtime cap, and crawl jobs gone inactive. The "running, no start"
/// and "crawl inactivity" cases also bump the owning task's `failed_executions` /
/// `consecutive_failures`, per the stale-execution cleanup table's "task counters
/// updated" column.
#[instrument(skip(executions, jobs, tasks))]
pub async fn sweep_stale_executions(
    executions: &TaskExecutionRepository,
    jobs: &JobRepository,
    tasks: &ScheduledTaskRepository,
    now: DateTime<Utc>,
) -> Result<StaleSweepReport, DatabaseError> {
    let mut report = StaleSweepReport::default();

    let stale = executions
        .find_stale(
            now - Duration::minutes(PENDING_NO_START_MINUTES),
            now - Duration::minutes(PENDING_STARTED_MINUTES),
            now - Duration::minutes(RUNNING_NO_START_MINUTES),
        )
        .await?;
    for execution in &stale {
        let code = stale_reason(execution);
        let (reason, update_task_counters) = match code {
            STALE_PENDING_TIMEOUT => ("pending_no_start", false),
            STALE_PENDING_STARTED => ("pending_started_timeout", false),
            _ => ("running_no_start", true),
        };
        fail_execution(executions, tasks, execution, code, reason, update_task_counters).await?;
        report.failed_executions += 1;
    }

    for (job_type, cap_minutes) in RUNTIME_CAPS {
        let over = executions.find_running_over_runtime(job_type, now - Duration::minutes(cap_minutes)).await?;
        for execution in &over {
            let reason = format!("{job_type}_runtime_exceeded");
            fail_execution(executions, tasks, execution, EXECUTION_TIMEOUT_CODE, &reason, false).await?;
            report.failed_executions += 1;
        }
    }

    let inactive_crawls = jobs.find_stale_crawl_jobs(now - Duration::minutes(CRAWL_INACTIVITY_MINUTES)).await?;
    for job in &inactive_crawls {
        jobs.update_status(&job.job_id, JobStatus::Failed, Some(false)).await?;
        report.failed_crawl_jobs += 1;
        warn!(job_id = %job.job_id, "crawl job failed for inactivity");

        if let Some(execution) = executions.find_running_by_job_uuid(job.uuid).await? {
            fail_execution(executions, tasks, &execution, EXECUTION_TIMEOUT_CODE, REASON_CRAWL_INACTIVE, true)
                .await?;
            report.failed_executions += 1;
        }
    }

    Ok(report)
}

fn stale_reason(execution: &TaskExecution) -> &'static str {
    match (execution.status, execution.started_at) {
        (ExecutionStatus::Pending, None) => STALE_PENDING_TIMEOUT,
        (ExecutionStatus::Pending, Some(_)) => STALE_PENDING_STARTED,
        _ => STALE_RUNNING_NO_START,
    }
}

async fn fail_execution(
    executions: &TaskExecutionRepository,
    tasks: &ScheduledTaskRepository,
    execution: &TaskExecution,
    code: &str,
    reason: &str,
    update_task_counters: bool,
) -> Result<(), DatabaseError> {
    let mut updated = execution.clone();
    updated.status = ExecutionStatus::Failed;
    updated.completed_at = Some(Utc::now());
    updated.error_code = Some(code.to_string());
    updated.error_message = Some(format!("execution marked stale: {reason}"));
    updated.error_details = Some(serde_json::json!({ "reason": reason }));
    executions.update(&updated).await?;

    if update_task_counters {
        if let Ok(task) = tasks.find_by_uuid(execution.scheduled_task_uuid).await {
            let failed_task = record_task_failure(tasks, &task).await?;
            if failed_task.should_auto_pause() {
                tasks.pause(failed_task.uuid, "auto-paused after repeated consecutive failures").await?;
                warn!(task_uuid = %failed_task.uuid, "task auto-paused after repeated consecutive failures");
            }
        }
    }

    Ok(())
}

/// Bumps `failed_executions`/`consecutive_failures` on the owning task, shared by the
/// stale-execution sweep above and `SchedulerEngine::record_execution_outcome`'s
/// failure branch so both paths keep the same counter semantics.
pub async fn record_task_failure(
    tasks: &ScheduledTaskRepository,
    task: &ScheduledTask,
) -> Result<ScheduledTask, DatabaseError> {
    let mut updated = task.clone();
    updated.failed_executions += 1;
    updated.consecutive_failures += 1;
    tasks.update(&updated).await?;
    Ok(updated)
}

/// Enforces `spec`'s subscription-tier limits: groups active, non-paused tasks by
/// owner, and for any owner whose active count exceeds `limit(tier)`, pauses the
/// newest tasks over the limit (by creation time) and unregisters their triggers.
#[instrument(skip(tasks, api_keys, tier_limits))]
pub async fn enforce_tier_limits(
    tasks: &ScheduledTaskRepository,
    api_keys: &ApiKeyRepository,
    tier_limits: &crate::config::TierLimitsConfig,
) -> Result<usize, DatabaseError> {
    let eligible = tasks.find_eligible().await?;

    let mut by_owner: std::collections::HashMap<uuid::Uuid, Vec<crate::models::ScheduledTask>> =
        std::collections::HashMap::new();
    for task in eligible {
        by_owner.entry(task.owner.api_key_id).or_default().push(task);
    }

    let mut paused = 0;
    for (api_key_id, mut owner_tasks) in by_owner {
        let tier = match api_keys.find_by_id(api_key_id).await {
            Ok(key) => key.tier,
            Err(_) => continue,
        };
        let limit = tier_limits.limit_for(&tier);
        if (owner_tasks.len() as i64) <= limit {
            continue;
        }

        owner_tasks.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        let over = owner_tasks.len() - limit.max(0) as usize;
        for task in owner_tasks.into_iter().take(over) {
            tasks.pause(task.uuid, "subscription tier active-task limit exceeded").await?;
            paused += 1;
        }
    }

    Ok(paused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, TriggerSource};

    fn base_execution() -> TaskExecution {
        TaskExecution {
            uuid: uuid::Uuid::new_v4(),
            scheduled_task_uuid: uuid::Uuid::new_v4(),
            execution_number: 1,
            idempotency_key: "k".to_string(),
            status: ExecutionStatus::Pending,
            scheduled_for: Utc::now(),
            started_at: None,
            completed_at: None,
            triggered_by: TriggerSource::Scheduler,
            job_uuid: None,
            error_message: None,
            error_code: None,
            error_details: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn stale_reason_distinguishes_pending_with_and_without_start() {
        assert_eq!(stale_reason(&base_execution()), STALE_PENDING_TIMEOUT);

        let mut started = base_execution();
        started.started_at = Some(Utc::now());
        assert_eq!(stale_reason(&started), STALE_PENDING_STARTED);
    }

    #[test]
    fn stale_reason_treats_running_with_no_start_as_never_picked_up() {
        let mut running = base_execution();
        running.status = ExecutionStatus::Running;
        assert_eq!(stale_reason(&running), STALE_RUNNING_NO_START);
    }
}
