/// SQLite persistence layer for workflow definitions
///
/// Workflows are stored as JSON documents next to a few indexed lookup columns.

use crate::error::StorageError;
use crate::storage::WorkflowStore;
use crate::workflow::types::Workflow;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePool, Row};

/// SQLite-backed `WorkflowStore`
#[derive(Debug, Clone)]
pub struct SqliteWorkflowStore {
    pool: SqlitePool,
}

impl SqliteWorkflowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn decode(definition: &str) -> Result<Workflow, StorageError> {
        Ok(serde_json::from_str(definition)?)
    }
}

#[async_trait]
impl WorkflowStore for SqliteWorkflowStore {
    async fn list(&self) -> Result<Vec<Workflow>, StorageError> {
        let rows = sqlx::query("SELECT definition FROM workflows ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| Self::decode(&row.try_get::<String, _>("definition")?))
            .collect()
    }

    async fn get(&self, id: &str) -> Result<Option<Workflow>, StorageError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::decode(&row.try_get::<String, _>("definition")?)?)),
            None => Ok(None),
        }
    }

    /// Upsert handles both create and update; `updated_at` is refreshed
    async fn save(&self, mut workflow: Workflow) -> Result<Workflow, StorageError> {
        if workflow.id.trim().is_empty() {
            workflow.id = uuid::Uuid::new_v4().to_string();
        }
        workflow.updated_at = Utc::now();
        let definition_json = serde_json::to_string(&workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&definition_json)
        .bind(workflow.created_at.to_rfc3339())
        .bind(workflow.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(workflow)
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
