use std::sync::Arc;

use common::billing::BillingEngine;
use common::cache::CacheLayer;
use common::config::Settings;
use common::db::repositories::{
    ApiKeyRepository, JobRepository, ScheduledTaskRepository, TaskExecutionRepository,
};
use common::progress::ProgressTracker;
use common::queue::JobPublisher;
use common::sync_exec::SyncTaskExecutor;

/// Shared collaborators every handler delegates to. Holds no business logic itself —
/// the handlers are thin wrappers over these, matching the teacher's `AppState`
/// pattern of bundling repositories and clients behind one cloneable handle.
#[derive(Clone)]
pub struct AppState {
    pub tasks: ScheduledTaskRepository,
    pub executions: TaskExecutionRepository,
    pub jobs: JobRepository,
    pub api_keys: ApiKeyRepository,
    pub billing: Arc<dyn BillingEngine>,
    pub publisher: Arc<dyn JobPublisher>,
    pub progress: Arc<dyn ProgressTracker>,
    pub cache: Arc<dyn CacheLayer>,
    pub sync_executor: Arc<dyn SyncTaskExecutor>,
    pub engine_config: common::config::EngineConfig,
    pub config: Arc<Settings>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("config", &self.config).finish_non_exhaustive()
    }
}
