/// In-memory store implementations
///
/// Behave like the SQLite stores without touching disk; used by tests and by
/// embedders that do not need persistence.

use crate::error::StorageError;
use crate::runtime::variables::VariableMap;
use crate::storage::{
    AccountRecord, AccountStore, LogEntry, LogFilter, LogLevel, LogSink, VariableStore,
    WorkflowStore,
};
use crate::workflow::types::Workflow;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<BTreeMap<String, Workflow>>,
}

impl MemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryWorkflowStore {
    async fn list(&self) -> Result<Vec<Workflow>, StorageError> {
        Ok(self.workflows.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Workflow>, StorageError> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn save(&self, mut workflow: Workflow) -> Result<Workflow, StorageError> {
        if workflow.id.trim().is_empty() {
            workflow.id = uuid::Uuid::new_v4().to_string();
        }
        workflow.updated_at = Utc::now();
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow.clone());
        Ok(workflow)
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.workflows.write().await.remove(id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryVariableStore {
    variables: RwLock<VariableMap>,
}

impl MemoryVariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: VariableMap) -> Self {
        Self {
            variables: RwLock::new(values),
        }
    }
}

#[async_trait]
impl VariableStore for MemoryVariableStore {
    async fn load_all(&self) -> Result<VariableMap, StorageError> {
        Ok(self.variables.read().await.clone())
    }

    async fn save_all(&self, variables: &VariableMap) -> Result<(), StorageError> {
        let mut stored = self.variables.write().await;
        for (name, value) in variables {
            stored.insert(name.clone(), value.clone());
        }
        Ok(())
    }
}

type AccountKey = (String, String, String);

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: RwLock<HashMap<AccountKey, AccountRecord>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(category: &str, service: &str, account: &str) -> AccountKey {
        (category.to_string(), service.to_string(), account.to_string())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get_account(
        &self,
        category: &str,
        service: &str,
        account: &str,
    ) -> Result<Option<AccountRecord>, StorageError> {
        let key = Self::key(category, service, account);
        Ok(self.accounts.read().await.get(&key).cloned())
    }

    async fn update_field(
        &self,
        category: &str,
        service: &str,
        account: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        let key = Self::key(category, service, account);
        self.accounts
            .write()
            .await
            .entry(key)
            .or_default()
            .insert(field.to_string(), Value::String(value.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLogSink {
    entries: RwLock<Vec<LogEntry>>,
    /// Per-class retention limit, 0 keeps everything
    max_entries: usize,
}

impl MemoryLogSink {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_entries,
        }
    }

    /// Snapshot in insertion order
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn append(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        details: Option<Value>,
    ) -> Result<LogEntry, StorageError> {
        let entry = LogEntry::new(level, source, message, details);
        let mut entries = self.entries.write().await;
        entries.push(entry.clone());

        if self.max_entries > 0 {
            let system = entry.is_system();
            let same_class = entries.iter().filter(|e| e.is_system() == system).count();
            let mut excess = same_class.saturating_sub(self.max_entries);
            entries.retain(|e| {
                if excess > 0 && e.is_system() == system {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }

        Ok(entry)
    }

    async fn clear_warnings(&self, workflow_id: &str) -> Result<u64, StorageError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !(e.source == workflow_id && e.level == LogLevel::Warning));
        Ok((before - entries.len()) as u64)
    }

    async fn list(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, StorageError> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|entry| filter.matches(entry))
            .take(filter.limit)
            .cloned()
            .collect())
    }
}
