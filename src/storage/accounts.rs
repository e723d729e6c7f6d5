/// SQLite-backed account store
///
/// Accounts are grouped by category and service; each account row holds its
/// fields as one JSON object.

use crate::error::StorageError;
use crate::storage::{AccountRecord, AccountStore};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct SqliteAccountStore {
    pool: SqlitePool,
}

impl SqliteAccountStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn decode_record(fields: &str) -> Result<AccountRecord, StorageError> {
    match serde_json::from_str::<Value>(fields)? {
        Value::Object(record) => Ok(record),
        other => Err(StorageError::Corrupt(format!(
            "account fields must be an object, found {other}"
        ))),
    }
}

#[async_trait]
impl AccountStore for SqliteAccountStore {
    async fn get_account(
        &self,
        category: &str,
        service: &str,
        account: &str,
    ) -> Result<Option<AccountRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT fields FROM accounts WHERE category = ? AND service = ? AND account = ?",
        )
        .bind(category)
        .bind(service)
        .bind(account)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(decode_record(&row.try_get::<String, _>("fields")?)?)),
            None => Ok(None),
        }
    }

    async fn update_field(
        &self,
        category: &str,
        service: &str,
        account: &str,
        field: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT fields FROM accounts WHERE category = ? AND service = ? AND account = ?",
        )
        .bind(category)
        .bind(service)
        .bind(account)
        .fetch_optional(&mut *tx)
        .await?;

        let mut record = match row {
            Some(row) => decode_record(&row.try_get::<String, _>("fields")?)?,
            None => AccountRecord::new(),
        };
        record.insert(field.to_string(), Value::String(value.to_string()));

        sqlx::query(
            r#"
            INSERT INTO accounts (category, service, account, fields, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(category, service, account) DO UPDATE SET
                fields = excluded.fields,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(category)
        .bind(service)
        .bind(account)
        .bind(serde_json::to_string(&record)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[tokio::test]
    async fn update_creates_and_extends_records() {
        let store = Database::in_memory().await.unwrap().accounts();
        assert!(store
            .get_account("static_tokens", "github", "bot")
            .await
            .unwrap()
            .is_none());

        store
            .update_field("static_tokens", "github", "bot", "token", "t-1")
            .await
            .unwrap();
        store
            .update_field("static_tokens", "github", "bot", "username", "octo")
            .await
            .unwrap();
        store
            .update_field("static_tokens", "github", "bot", "token", "t-2")
            .await
            .unwrap();

        let record = store
            .get_account("static_tokens", "github", "bot")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record["token"], "t-2");
        assert_eq!(record["username"], "octo");

        assert!(store
            .get_account("dynamic_tokens", "github", "bot")
            .await
            .unwrap()
            .is_none());
    }
}
