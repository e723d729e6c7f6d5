/// Persistence collaborators of the engine
///
/// Each store is an async trait with a SQLite implementation (sqlx) for the
/// server and an in-memory implementation for tests and embedding:
/// - `WorkflowStore`: workflow definitions and run bookkeeping
/// - `VariableStore`: the durable variable map
/// - `AccountStore`: per-service account records read and updated by modules
/// - `LogSink`: append-only run and module event records

use crate::error::StorageError;
use crate::runtime::variables::VariableMap;
use crate::workflow::types::Workflow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

// SQLite pool creation and schema bootstrap
pub mod database;

// SQLite store implementations
pub mod accounts;
pub mod logs;
pub mod variables;

// In-memory store implementations
pub mod memory;

pub use accounts::SqliteAccountStore;
pub use database::Database;
pub use logs::SqliteLogSink;
pub use memory::{MemoryAccountStore, MemoryLogSink, MemoryVariableStore, MemoryWorkflowStore};
pub use variables::SqliteVariableStore;

/// Source name of log entries that do not belong to a workflow
pub const SYSTEM_SOURCE: &str = "system";

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Workflow>, StorageError>;

    async fn get(&self, id: &str) -> Result<Option<Workflow>, StorageError>;

    /// Insert or replace; assigns an id when empty and stamps `updated_at`
    async fn save(&self, workflow: Workflow) -> Result<Workflow, StorageError>;

    async fn delete(&self, id: &str) -> Result<bool, StorageError>;

    /// Stamp `last_run` with the current time and store the result summary
    async fn record_result(&self, id: &str, result: &str) -> Result<bool, StorageError> {
        let Some(mut workflow) = self.get(id).await? else {
            return Ok(false);
        };
        workflow.last_run = Some(Utc::now());
        workflow.last_result = Some(result.to_string());
        self.save(workflow).await?;
        Ok(true)
    }
}

#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn load_all(&self) -> Result<VariableMap, StorageError>;

    /// Merge: upsert every given key, leave other stored keys untouched
    async fn save_all(&self, variables: &VariableMap) -> Result<(), StorageError>;
}

/// Field map of one account record
pub type AccountRecord = Map<String, Value>;

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(
        &self,
        category: &str,
        service: &str,
        account: &str,
    ) -> Result<Option<AccountRecord>, StorageError>;

    /// Set one field, creating the service and account entries when missing
    async fn update_field(
        &self,
        category: &str,
        service: &str,
        account: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StorageError>;
}

#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        details: Option<Value>,
    ) -> Result<LogEntry, StorageError>;

    /// Delete warning entries of one workflow; returns how many were removed
    async fn clear_warnings(&self, workflow_id: &str) -> Result<u64, StorageError>;

    /// Newest entries first
    async fn list(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, StorageError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = StorageError;

    fn from_str(level: &str) -> Result<Self, Self::Err> {
        match level.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(StorageError::Corrupt(format!("unknown log level '{other}'"))),
        }
    }
}

/// One persisted log record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    /// Workflow id or `system`
    pub source: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, source: &str, message: &str, details: Option<Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            level,
            source: source.to_string(),
            message: message.to_string(),
            details,
        }
    }

    pub fn is_system(&self) -> bool {
        self.source == SYSTEM_SOURCE
    }
}

fn default_log_limit() -> usize {
    100
}

/// Query for `LogSink::list`
#[derive(Debug, Clone, Deserialize)]
pub struct LogFilter {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub level: Option<LogLevel>,
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            source: None,
            level: None,
            limit: default_log_limit(),
        }
    }
}

impl LogFilter {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.source.as_deref().map_or(true, |source| entry.source == source)
            && self.level.map_or(true, |level| entry.level == level)
    }
}
