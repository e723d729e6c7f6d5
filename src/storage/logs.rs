/// SQLite-backed log sink
///
/// Entries are append-only apart from warning cleanup and retention trimming.
/// Retention keeps the newest `max_entries` system entries and, separately,
/// the newest `max_entries` workflow entries.

use crate::error::StorageError;
use crate::storage::{LogEntry, LogFilter, LogLevel, LogSink, SYSTEM_SOURCE};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqlitePool, SqliteRow},
    Row,
};

#[derive(Debug, Clone)]
pub struct SqliteLogSink {
    pool: SqlitePool,
    /// Per-class retention limit, 0 keeps everything
    max_entries: usize,
}

impl SqliteLogSink {
    pub fn new(pool: SqlitePool, max_entries: usize) -> Self {
        Self { pool, max_entries }
    }

    async fn trim(&self, system: bool) -> Result<(), StorageError> {
        if self.max_entries == 0 {
            return Ok(());
        }

        let removed = sqlx::query(
            r#"
            DELETE FROM logs
            WHERE (source = ?1) = ?2 AND seq <= (
                SELECT seq FROM logs
                WHERE (source = ?1) = ?2
                ORDER BY seq DESC
                LIMIT 1 OFFSET ?3
            )
            "#,
        )
        .bind(SYSTEM_SOURCE)
        .bind(system)
        .bind(self.max_entries as i64)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if removed > 0 {
            tracing::debug!("🧹 Trimmed {} old log entries", removed);
        }
        Ok(())
    }
}

fn decode_entry(row: &SqliteRow) -> Result<LogEntry, StorageError> {
    let timestamp: String = row.try_get("timestamp")?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| StorageError::Corrupt(format!("bad log timestamp '{timestamp}': {e}")))?
        .with_timezone(&Utc);
    let level: String = row.try_get("level")?;
    let details: Option<String> = row.try_get("details")?;

    Ok(LogEntry {
        id: row.try_get("id")?,
        timestamp,
        level: level.parse()?,
        source: row.try_get("source")?,
        message: row.try_get("message")?,
        details: details
            .map(|details| serde_json::from_str::<Value>(&details))
            .transpose()?,
    })
}

#[async_trait]
impl LogSink for SqliteLogSink {
    async fn append(
        &self,
        level: LogLevel,
        source: &str,
        message: &str,
        details: Option<Value>,
    ) -> Result<LogEntry, StorageError> {
        let entry = LogEntry::new(level, source, message, details);
        let details_json = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO logs (id, timestamp, level, source, message, details)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.level.as_str())
        .bind(&entry.source)
        .bind(&entry.message)
        .bind(details_json)
        .execute(&self.pool)
        .await?;

        self.trim(entry.is_system()).await?;
        Ok(entry)
    }

    async fn clear_warnings(&self, workflow_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM logs WHERE source = ? AND level = ?")
            .bind(workflow_id)
            .bind(LogLevel::Warning.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list(&self, filter: &LogFilter) -> Result<Vec<LogEntry>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, level, source, message, details FROM logs
            WHERE (?1 IS NULL OR source = ?1) AND (?2 IS NULL OR level = ?2)
            ORDER BY seq DESC
            LIMIT ?3
            "#,
        )
        .bind(filter.source.as_deref())
        .bind(filter.level.map(|level| level.as_str()))
        .bind(filter.limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_entry).collect()
    }
}
