/// SQLite-backed variable store
///
/// One row per variable, values kept as JSON text in a TEXT column. Reads cast
/// to text so rows written with numeric affinity still decode.

use crate::error::StorageError;
use crate::runtime::variables::VariableMap;
use crate::storage::VariableStore;
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct SqliteVariableStore {
    pool: SqlitePool,
}

impl SqliteVariableStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VariableStore for SqliteVariableStore {
    async fn load_all(&self) -> Result<VariableMap, StorageError> {
        let rows = sqlx::query("SELECT name, CAST(value AS TEXT) AS value FROM variables")
            .fetch_all(&self.pool)
            .await?;

        let mut variables = VariableMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let value: String = row.try_get("value")?;
            variables.insert(name, serde_json::from_str(&value)?);
        }
        Ok(variables)
    }

    async fn save_all(&self, variables: &VariableMap) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        for (name, value) in variables {
            sqlx::query(
                r#"
                INSERT INTO variables (name, value, updated_at)
                VALUES (?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(name) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(name)
            .bind(serde_json::to_string(value)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!("💾 Persisted {} variables", variables.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use serde_json::json;

    #[tokio::test]
    async fn save_all_merges_with_stored_values() {
        let store = Database::in_memory().await.unwrap().variables();

        let mut first = VariableMap::new();
        first.insert("token".into(), json!("abc"));
        first.insert("count".into(), json!(1));
        store.save_all(&first).await.unwrap();

        let mut second = VariableMap::new();
        second.insert("count".into(), json!(2));
        second.insert("flags".into(), json!({"beta": true}));
        store.save_all(&second).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded["token"], json!("abc"));
        assert_eq!(loaded["count"], json!(2));
        assert_eq!(loaded["flags"], json!({"beta": true}));
    }

    #[tokio::test]
    async fn numeric_values_reload_after_a_run() {
        let store = Database::in_memory().await.unwrap().variables();

        let mut values = VariableMap::new();
        values.insert("status".into(), json!(0));
        values.insert("total".into(), json!(4.5));
        values.insert("digits".into(), json!("42"));
        store.save_all(&values).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded["status"], json!(0));
        assert_eq!(loaded["total"], json!(4.5));
        assert_eq!(loaded["digits"], json!("42"));
    }

    #[tokio::test]
    async fn legacy_numeric_affinity_rows_still_load() {
        let database = Database::in_memory().await.unwrap();
        sqlx::query("DROP TABLE variables").execute(database.pool()).await.unwrap();
        sqlx::query("CREATE TABLE variables (name TEXT PRIMARY KEY, value JSON NOT NULL, updated_at TIMESTAMP)")
            .execute(database.pool())
            .await
            .unwrap();
        let store = database.variables();

        let mut values = VariableMap::new();
        values.insert("count".into(), json!(1));
        store.save_all(&values).await.unwrap();
        assert_eq!(store.load_all().await.unwrap()["count"], json!(1));
    }
}
