/// Account configuration module: read or update one field of a stored account

use super::{option_key, ModuleContext, ModuleHandler, ModuleOutput};
use crate::error::ModuleError;
use crate::runtime::variables::{stringify, whole_reference};
use crate::storage::AccountStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Storage key of a field given by label or key
pub fn field_key(field: &str) -> String {
    match option_key(field).as_str() {
        "" | "username" | "user_name" | "user" | "用户名" => "username".into(),
        "password" | "密码" => "password".into(),
        "token" => "token".into(),
        "expires_at" | "expiry" | "expiration" | "expires" | "过期时间" => "expires_at".into(),
        _ => field.trim().to_string(),
    }
}

/// Storage key of a category given by label or key
pub fn category_key(category: &str) -> Result<&'static str, ModuleError> {
    match option_key(category).as_str() {
        "" | "static_tokens" | "static_token" | "静态token" => Ok("static_tokens"),
        "dynamic_tokens" | "dynamic_token" | "动态token" => Ok("dynamic_tokens"),
        "other" | "other_info" | "其他信息" => Ok("other"),
        other => Err(ModuleError::Validation(format!("unknown account category '{other}'"))),
    }
}

pub struct AccountConfig {
    accounts: Arc<dyn AccountStore>,
}

impl AccountConfig {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }
}

#[async_trait]
impl ModuleHandler for AccountConfig {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let category = category_key(&ctx.raw_text("category"))?;
        let service = ctx.resolve("service").trim().to_string();
        let account = ctx.resolve("account_name").trim().to_string();
        let field = field_key(&ctx.raw_text("field"));
        let masked = |value: &str| {
            if field == "password" { "******".to_string() } else { value.to_string() }
        };

        match option_key(&ctx.raw_text("action")).as_str() {
            "" | "read" | "读取" => {
                let value = self
                    .accounts
                    .get_account(category, &service, &account)
                    .await?
                    .and_then(|record| record.get(&field).map(stringify))
                    .unwrap_or_default();
                ctx.log
                    .debug(
                        format!("🔑 '{}' read {category}/{service}/{account}.{field}", ctx.module.display_name()),
                        Some(json!({ "value": masked(&value) })),
                    )
                    .await;
                ctx.store_output(value.as_str());
                Ok(ModuleOutput::new(value))
            }
            "update" | "write" | "更新" => {
                let raw = ctx.raw_text("value");
                let value = match whole_reference(&raw) {
                    Some(name) => ctx
                        .variables
                        .get(name)
                        .map(stringify)
                        .ok_or_else(|| ModuleError::Validation(format!("variable '{name}' is not defined")))?,
                    None => ctx.variables.substitute(&raw),
                };
                if service.is_empty() || account.is_empty() {
                    return Err(ModuleError::Validation(
                        "service and account_name are required for updates".into(),
                    ));
                }

                self.accounts
                    .update_field(category, &service, &account, &field, &value)
                    .await?;
                ctx.log
                    .info(
                        format!("🔑 '{}' updated {category}/{service}/{account}.{field}", ctx.module.display_name()),
                        Some(json!({ "value": masked(&value) })),
                    )
                    .await;
                Ok(ModuleOutput::new(Value::String(format!("account '{account}' updated"))))
            }
            other => Err(ModuleError::Validation(format!("unsupported account action '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::runtime::variables::Variables;
    use crate::storage::MemoryAccountStore;
    use crate::workflow::types::{Module, ModuleType};

    fn account_module(action: &str) -> Module {
        testing::module(ModuleType::AccountConfig)
            .with("action", action)
            .with("category", "Dynamic Tokens")
            .with("service", "weibo")
            .with("account_name", "default")
            .with("field", "Token")
    }

    #[test]
    fn labels_map_to_storage_keys() {
        assert_eq!(field_key("Username"), "username");
        assert_eq!(field_key("Expires At"), "expires_at");
        assert_eq!(field_key("cookie"), "cookie");
        assert_eq!(category_key("Static Tokens").unwrap(), "static_tokens");
        assert_eq!(category_key("other").unwrap(), "other");
        assert!(category_key("secrets").is_err());

        assert_eq!(field_key("用户名"), "username");
        assert_eq!(field_key("密码"), "password");
        assert_eq!(field_key("过期时间"), "expires_at");
        assert_eq!(category_key("静态Token").unwrap(), "static_tokens");
        assert_eq!(category_key("动态Token").unwrap(), "dynamic_tokens");
        assert_eq!(category_key("其他信息").unwrap(), "other");
    }

    #[tokio::test]
    async fn update_then_read_round_trips_through_the_store() {
        let store = Arc::new(MemoryAccountStore::new());
        let handler = AccountConfig::new(store.clone());
        let mut vars = Variables::new();
        vars.set("fresh", "tok-123");

        testing::run(&handler, &account_module("update").with("value", "[fresh]"), &mut vars)
            .await
            .unwrap();
        let stored = store
            .get_account("dynamic_tokens", "weibo", "default")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.get("token"), Some(&json!("tok-123")));

        let output = testing::run(
            &handler,
            &account_module("read").with("output_var", "token"),
            &mut vars,
        )
        .await
        .unwrap();
        assert_eq!(output.value, json!("tok-123"));
        assert_eq!(vars.text("token").as_deref(), Some("tok-123"));
    }

    #[tokio::test]
    async fn reading_a_missing_field_is_empty() {
        let handler = AccountConfig::new(Arc::new(MemoryAccountStore::new()));
        let output = testing::run(&handler, &account_module("read"), &mut Variables::new())
            .await
            .unwrap();
        assert_eq!(output.value, json!(""));
    }

    #[tokio::test]
    async fn update_requires_defined_variable_and_identity() {
        let handler = AccountConfig::new(Arc::new(MemoryAccountStore::new()));
        let missing_var = account_module("update").with("value", "[nope]");
        assert!(matches!(
            testing::run(&handler, &missing_var, &mut Variables::new()).await,
            Err(ModuleError::Validation(_))
        ));

        let no_service = account_module("update")
            .with("service", "")
            .with("value", "literal");
        assert!(matches!(
            testing::run(&handler, &no_service, &mut Variables::new()).await,
            Err(ModuleError::Validation(_))
        ));
    }
}
