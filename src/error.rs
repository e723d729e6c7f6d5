/// Error taxonomy for the workflow engine
///
/// Structural errors abort a run before any module executes. Module errors are
/// converted into failed module results at the dispatcher boundary. Scheduling
/// errors are returned to whoever asked for a (re)registration.

use thiserror::Error;

/// Persistence failures shared by every store implementation
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Run-fatal errors raised while planning or loading a workflow run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cyclic dependency detected at module '{module_id}'")]
    CyclicDependency { module_id: String },

    #[error("connection {side} references unknown module '{module_id}'")]
    UnknownModuleReference {
        module_id: String,
        side: &'static str,
    },

    #[error("condition module '{module_id}' opens a block inside another condition block")]
    NestedConditionBlock { module_id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of a single module operation
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("unknown module type: {0}")]
    UnknownModuleType(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("parse failed: {0}")]
    Parse(String),

    #[error("crypto failed: {0}")]
    Crypto(String),

    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    #[error("request failed: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("no reachable domain")]
    NoDomainAvailable,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures of schedule registration and triggered runs
#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
