// Error handling framework: one thiserror enum per subsystem, converging into ApiError.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("task template missing for task {task_uuid}")]
    TemplateMissing { task_uuid: uuid::Uuid },

    #[error("tier limit exceeded: owner {owner_id} has {count} active tasks, limit {limit}")]
    TierLimitExceeded { owner_id: uuid::Uuid, count: i64, limit: i64 },

    #[error("execution timeout: {reason}")]
    ExecutionTimeout { reason: String },

    #[error("lock acquisition failed: {0}")]
    LockFailed(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("billing error: {0}")]
    Billing(#[from] BillingError),
}

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("execution not found: {0}")]
    NotFound(String),

    #[error("execution already terminal: {status}")]
    AlreadyTerminal { status: String },

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("progress tracker error: {0}")]
    Progress(#[from] ProgressError),

    #[error("billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum ProgressError {
    #[error("crawl progress state not found for job {0}")]
    NotFound(String),

    #[error("crawl already finalized for job {0}")]
    AlreadyFinalized(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("api key not found: {0}")]
    ApiKeyNotFound(uuid::Uuid),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("failed to chargeToUsed after {attempts} retries")]
    OptimisticLockExhausted { attempts: u32 },

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("object store error: {0}")]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("engine not available: {0}")]
    EngineNotAvailable(String),

    #[error("challenge encountered: {0}")]
    ChallengeUnresolved(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("navigation timeout after {0}ms")]
    NavigationTimeout(u64),
}

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("webhook delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("webhook target rejected payload with status {status}")]
    Rejected { status: u16 },
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid api key")]
    InvalidApiKey,
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("field '{field}' is invalid: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("record not found")]
    NotFound,

    #[error("duplicate key")]
    DuplicateKey,

    #[error("foreign key violation")]
    ForeignKeyViolation,

    #[error("optimistic lock conflict")]
    OptimisticLockConflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some("23505") => DatabaseError::DuplicateKey,
                Some("23503") => DatabaseError::ForeignKeyViolation,
                _ => DatabaseError::Query(db_err.to_string()),
            },
            other => DatabaseError::Query(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object store error: {0}")]
    MinioError(String),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("redis error: {0}")]
    Redis(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(DatabaseError::from(err))
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        StorageError::Redis(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("stream creation error: {0}")]
    StreamCreation(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("consumer creation error: {0}")]
    ConsumerCreation(String),

    #[error("publish error: {0}")]
    PublishFailed(String),

    #[error("serialization error: {0}")]
    SerializationFailed(String),

    #[error("deserialization error: {0}")]
    DeserializationFailed(String),

    #[error("consume error: {0}")]
    ConsumeFailed(String),

    #[error("ack error: {0}")]
    AckFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("health check failed: {0}")]
    HealthCheck(String),
}

/// HTTP-facing error envelope. `code` doubles as the error variant discriminant
/// returned to clients, so it must stay stable once shipped.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into(), details: None }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::new("VALIDATION_ERROR", err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::new("UNAUTHORIZED", err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound => ApiError::new("NOT_FOUND", "resource not found"),
            DatabaseError::OptimisticLockConflict => {
                ApiError::new("CONFLICT", "concurrent update conflict, retry")
            }
            other => ApiError::new("INTERNAL_ERROR", other.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientCredits { required, available } => {
                ApiError::new("INSUFFICIENT_CREDITS", "not enough credits for this operation")
                    .with_details(serde_json::json!({
                        "required": required,
                        "current_credits": available,
                    }))
            }
            BillingError::JobNotFound(_) | BillingError::ApiKeyNotFound(_) => {
                ApiError::new("NOT_FOUND", err.to_string())
            }
            other => ApiError::new("INTERNAL_ERROR", other.to_string()),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::TaskNotFound(_) => ApiError::new("NOT_FOUND", err.to_string()),
            ScheduleError::TierLimitExceeded { owner_id: _, count, limit } => {
                ApiError::new("TIER_LIMIT_EXCEEDED", "active task limit exceeded")
                    .with_details(serde_json::json!({ "count": count, "limit": limit }))
            }
            ScheduleError::InvalidCronExpression { .. } => {
                ApiError::new("VALIDATION_ERROR", err.to_string())
            }
            other => ApiError::new("INTERNAL_ERROR", other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::new("INTERNAL_ERROR", err.to_string())
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::new("INTERNAL_ERROR", err.to_string())
    }
}

impl From<ProgressError> for ApiError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::NotFound(_) => ApiError::new("NOT_FOUND", "crawl not found"),
            other => ApiError::new("INTERNAL_ERROR", other.to_string()),
        }
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::EngineNotAvailable(_) => {
                ApiError::new("ENGINE_NOT_AVAILABLE", err.to_string())
            }
            ExtractionError::ChallengeUnresolved(_) => {
                ApiError::new("CHALLENGE_UNRESOLVED", err.to_string())
            }
            ExtractionError::NavigationTimeout(_) => {
                ApiError::new("EXECUTION_TIMEOUT", err.to_string())
            }
            other => ApiError::new("INTERNAL_ERROR", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_error_display() {
        let err = ScheduleError::TaskNotFound("abc".into());
        assert_eq!(err.to_string(), "task not found: abc");
    }

    #[test]
    fn test_billing_error_to_api_error_carries_current_credits() {
        let err = BillingError::InsufficientCredits { required: 10, available: 3 };
        let api_err: ApiError = err.into();
        assert_eq!(api_err.code, "INSUFFICIENT_CREDITS");
        assert_eq!(api_err.details.unwrap()["current_credits"], 3);
    }

    #[test]
    fn test_auth_error_to_api_error() {
        let api_err: ApiError = AuthError::MissingToken.into();
        assert_eq!(api_err.code, "UNAUTHORIZED");
    }

    #[test]
    fn test_api_error_with_details() {
        let err = ApiError::new("X", "y").with_details(serde_json::json!({"a": 1}));
        assert_eq!(err.details.unwrap()["a"], 1);
    }

    #[test]
    fn test_database_error_not_found_maps_to_404_code() {
        let api_err: ApiError = DatabaseError::NotFound.into();
        assert_eq!(api_err.code, "NOT_FOUND");
    }
}
