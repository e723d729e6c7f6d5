/// Built-in module handlers
///
/// Each module kind is one `ModuleHandler` registered in the `ModuleExecutor`
/// dispatch table. Handlers read their configuration through `ModuleContext`,
/// which substitutes `[variable]` references once before use, and write
/// produced values to `output_var` when it is configured.
///
/// - `text`: hashing, encodings, replace, JSON path extraction, variables, templates
/// - `crypto`: AES encrypt/decrypt
/// - `network`: HTTP requests, TCP reachability probes, proxy settings
/// - `control`: condition blocks, repeat markers, delays
/// - `data`: random values, timestamps, arithmetic, number formatting
/// - `notify`: notification channels
/// - `account`: account record read/update

use crate::error::ModuleError;
use crate::notification::{Notifier, SharedNotificationSettings};
use crate::runtime::executor::ModuleExecutor;
use crate::runtime::logger::WorkflowLogger;
use crate::runtime::variables::{is_reserved, stringify, Variables};
use crate::storage::AccountStore;
use crate::workflow::types::{Module, ModuleType};
use async_trait::async_trait;
use serde_json::Value;
use std::{sync::Arc, time::Duration};

pub mod account;
pub mod control;
pub mod crypto;
pub mod data;
pub mod network;
pub mod notify;
pub mod text;

/// One module operation
#[async_trait]
pub trait ModuleHandler: Send + Sync {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError>;
}

/// What a handler hands back to the dispatcher
#[derive(Debug, Clone, Default)]
pub struct ModuleOutput {
    pub value: Value,
    /// Selected branch tag (condition modules)
    pub branch: Option<String>,
    /// HTTP status (request modules)
    pub status_code: Option<u16>,
    /// Repetition requested by a repeat module
    pub repeat: Option<RepeatIntent>,
}

impl ModuleOutput {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_repeat(mut self, repeat: RepeatIntent) -> Self {
        self.repeat = Some(repeat);
        self
    }
}

/// Re-run the module at position `target` `times` times
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatIntent {
    pub target: String,
    pub times: u32,
    pub interval: Duration,
}

/// Everything a handler may touch while it runs
pub struct ModuleContext<'a> {
    pub module: &'a Module,
    pub variables: &'a mut Variables,
    pub log: &'a WorkflowLogger,
}

impl<'a> ModuleContext<'a> {
    pub fn new(module: &'a Module, variables: &'a mut Variables, log: &'a WorkflowLogger) -> Self {
        Self {
            module,
            variables,
            log,
        }
    }

    pub fn raw(&self, key: &str) -> Option<&'a Value> {
        self.module.config.get(key)
    }

    /// Unsubstituted config text; absent and null read as empty
    pub fn raw_text(&self, key: &str) -> String {
        match self.raw(key) {
            None | Some(Value::Null) => String::new(),
            Some(value) => stringify(value),
        }
    }

    /// Config text after one substitution pass
    pub fn resolve(&self, key: &str) -> String {
        self.variables.substitute(&self.raw_text(key))
    }

    /// Substituted config text, `default` when absent or blank
    pub fn resolve_or(&self, key: &str, default: &str) -> String {
        let text = self.resolve(key);
        if text.trim().is_empty() {
            default.to_string()
        } else {
            text
        }
    }

    pub fn number(&self, key: &str, default: f64) -> Result<f64, ModuleError> {
        if let Some(Value::Number(number)) = self.raw(key) {
            return number
                .as_f64()
                .ok_or_else(|| ModuleError::Validation(format!("{key} is not a finite number")));
        }
        let text = self.resolve(key);
        let text = text.trim();
        if text.is_empty() {
            return Ok(default);
        }
        text.parse()
            .map_err(|_| ModuleError::Validation(format!("{key} must be a number, got '{text}'")))
    }

    /// Whole number; fractional input is truncated
    pub fn integer(&self, key: &str, default: i64) -> Result<i64, ModuleError> {
        let text = self.resolve(key);
        let text = text.trim();
        if text.is_empty() {
            return Ok(default);
        }
        match text.parse::<i64>() {
            Ok(value) => Ok(value),
            Err(_) => self.number(key, default as f64).map(|value| value.trunc() as i64),
        }
    }

    /// Non-negative duration given in (fractional) seconds
    pub fn seconds(&self, key: &str, default: f64) -> Result<Duration, ModuleError> {
        let seconds = self.number(key, default)?.max(0.0);
        Duration::try_from_secs_f64(seconds)
            .map_err(|_| ModuleError::Validation(format!("{key} is out of range: {seconds}")))
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// Configured variable name for a produced value
    ///
    /// Engine-reserved `_` names are refused with a warning; they would never persist.
    pub fn target_var(&self, key: &str) -> Option<String> {
        let name = self.raw_text(key);
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if is_reserved(name) {
            tracing::warn!(
                "⚠️ Module {} ignores {} '{}': names starting with '_' are reserved",
                self.module.id,
                key,
                name
            );
            return None;
        }
        Some(name.to_string())
    }

    /// Write `value` to `output_var` when configured
    pub fn store_output(&mut self, value: impl Into<Value>) {
        if let Some(name) = self.target_var("output_var") {
            self.variables.set(name, value);
        }
    }
}

/// Canonical form of an option value: lowercase, words joined by `_`
pub fn option_key(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Shared collaborators for handlers with side effects
#[derive(Clone)]
pub struct ModuleServices {
    pub notifier: Arc<dyn Notifier>,
    pub notification_settings: SharedNotificationSettings,
    pub accounts: Arc<dyn AccountStore>,
}

/// Install every built-in handler
pub fn register_builtin(executor: &mut ModuleExecutor, services: &ModuleServices) {
    executor
        .register(ModuleType::Md5, text::Md5Hash)
        .register(ModuleType::Base64Encode, text::Base64Encode)
        .register(ModuleType::Base64Decode, text::Base64Decode)
        .register(ModuleType::TextReplace, text::TextReplace)
        .register(ModuleType::UrlEncode, text::UrlEncode)
        .register(ModuleType::UrlDecode, text::UrlDecode)
        .register(ModuleType::JsonParse, text::JsonParse)
        .register(ModuleType::SetVariable, text::SetVariable)
        .register(ModuleType::TextTemplate, text::TextTemplate)
        .register(ModuleType::AesEncrypt, crypto::AesEncrypt)
        .register(ModuleType::AesDecrypt, crypto::AesDecrypt)
        .register(ModuleType::HttpRequest, network::HttpRequest)
        .register(ModuleType::CheckDomains, network::CheckDomains)
        .register(ModuleType::SystemProxy, network::SystemProxy)
        .register(ModuleType::Condition, control::Condition)
        .register(ModuleType::ConditionEnd, control::ConditionEnd)
        .register(ModuleType::Repeat, control::Repeat)
        .register(ModuleType::Delay, control::Delay)
        .register(ModuleType::RandomNumber, data::RandomNumber)
        .register(ModuleType::Timestamp, data::Timestamp)
        .register(ModuleType::Calculate, data::Calculate)
        .register(ModuleType::NumberFormat, data::NumberFormat)
        .register(
            ModuleType::Notification,
            notify::SendNotification::new(
                Arc::clone(&services.notifier),
                Arc::clone(&services.notification_settings),
            ),
        )
        .register(
            ModuleType::AccountConfig,
            account::AccountConfig::new(Arc::clone(&services.accounts)),
        );
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for driving a single handler in tests

    use super::*;
    use crate::storage::MemoryLogSink;

    pub fn logger() -> WorkflowLogger {
        WorkflowLogger::new(Arc::new(MemoryLogSink::new(0)), "test")
    }

    pub async fn run<H: ModuleHandler>(
        handler: &H,
        module: &Module,
        variables: &mut Variables,
    ) -> Result<ModuleOutput, ModuleError> {
        let log = logger();
        let mut ctx = ModuleContext::new(module, variables, &log);
        handler.execute(&mut ctx).await
    }

    pub fn module(module_type: ModuleType) -> Module {
        Module::new("m1", module_type, "under test")
    }
}
