/// Core workflow type definitions
///
/// Workflows, modules and connections as they are stored and edited. These types
/// are serialized to JSON for persistence and are read-only during a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, time::Duration};

/// Longest retry interval honoured, one year in minutes
pub const MAX_RETRY_INTERVAL_MINUTES: u64 = 525_600;

fn default_retry_interval() -> u64 {
    5
}

/// A complete workflow definition: modules, their connections and schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Opaque workflow identifier
    #[serde(default)]
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Modules in declaration order
    #[serde(default)]
    pub modules: Vec<Module>,
    /// Dependency edges between modules
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub enabled: bool,
    /// Cron expression, five-field crontab or six/seven-field with seconds
    #[serde(default)]
    pub cron: Option<String>,
    /// Maximum automatic retries after the first failure
    #[serde(default)]
    pub retry_count: u32,
    /// Minutes between retries (floored at one when used)
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create an empty, disabled workflow with a fresh id
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            modules: Vec::new(),
            connections: Vec::new(),
            enabled: false,
            cron: None,
            retry_count: 0,
            retry_interval: default_retry_interval(),
            last_run: None,
            last_result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cron expression when the workflow should be on the schedule
    pub fn active_cron(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.cron
            .as_deref()
            .map(str::trim)
            .filter(|expr| !expr.is_empty())
    }

    /// Delay before the next automatic retry, clamped to one minute ..= one year
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_interval.clamp(1, MAX_RETRY_INTERVAL_MINUTES) * 60)
    }

    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.id == id)
    }
}

/// One operation node of the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    #[serde(default)]
    pub name: String,
    /// Type-specific configuration; string fields may contain `[variable]` references
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Editor canvas coordinates, ignored by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<CanvasPosition>,
}

impl Module {
    pub fn new(id: impl Into<String>, module_type: ModuleType, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module_type,
            name: name.into(),
            config: Map::new(),
            position: None,
        }
    }

    /// Builder-style config setter, mostly for tests and programmatic workflows
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    /// Name shown in run reports: "name (type label)"
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.name, self.module_type.label())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CanvasPosition {
    pub x: f64,
    pub y: f64,
}

/// Directed dependency edge: `target` runs after `source`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(alias = "from")]
    pub source: String,
    #[serde(alias = "to")]
    pub target: String,
}

impl Connection {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Closed set of module kinds
///
/// Serialized as the snake_case type tag. Unrecognised tags are kept as
/// `Unknown` so a stored workflow still loads and the dispatcher can reject
/// the module at run time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModuleType {
    Md5,
    Base64Encode,
    Base64Decode,
    TextReplace,
    UrlEncode,
    UrlDecode,
    HttpRequest,
    JsonParse,
    SetVariable,
    TextTemplate,
    Notification,
    AccountConfig,
    Delay,
    AesEncrypt,
    AesDecrypt,
    Condition,
    ConditionEnd,
    Repeat,
    RandomNumber,
    Timestamp,
    SystemProxy,
    Calculate,
    CheckDomains,
    NumberFormat,
    Unknown(String),
}

impl ModuleType {
    /// Every built-in module kind
    pub fn builtin() -> Vec<ModuleType> {
        use ModuleType::*;
        vec![
            Md5,
            Base64Encode,
            Base64Decode,
            TextReplace,
            UrlEncode,
            UrlDecode,
            HttpRequest,
            JsonParse,
            SetVariable,
            TextTemplate,
            Notification,
            AccountConfig,
            Delay,
            AesEncrypt,
            AesDecrypt,
            Condition,
            ConditionEnd,
            Repeat,
            RandomNumber,
            Timestamp,
            SystemProxy,
            Calculate,
            CheckDomains,
            NumberFormat,
        ]
    }

    /// Stored type tag
    pub fn tag(&self) -> &str {
        match self {
            ModuleType::Md5 => "md5",
            ModuleType::Base64Encode => "base64_encode",
            ModuleType::Base64Decode => "base64_decode",
            ModuleType::TextReplace => "text_replace",
            ModuleType::UrlEncode => "url_encode",
            ModuleType::UrlDecode => "url_decode",
            ModuleType::HttpRequest => "http_request",
            ModuleType::JsonParse => "json_parse",
            ModuleType::SetVariable => "set_variable",
            ModuleType::TextTemplate => "text_template",
            ModuleType::Notification => "notification",
            ModuleType::AccountConfig => "account_config",
            ModuleType::Delay => "delay",
            ModuleType::AesEncrypt => "aes_encrypt",
            ModuleType::AesDecrypt => "aes_decrypt",
            ModuleType::Condition => "condition",
            ModuleType::ConditionEnd => "condition_end",
            ModuleType::Repeat => "repeat",
            ModuleType::RandomNumber => "random_number",
            ModuleType::Timestamp => "timestamp",
            ModuleType::SystemProxy => "system_proxy",
            ModuleType::Calculate => "calculate",
            ModuleType::CheckDomains => "check_domains",
            ModuleType::NumberFormat => "number_format",
            ModuleType::Unknown(tag) => tag,
        }
    }

    /// Human-readable label used in reports and logs
    pub fn label(&self) -> &str {
        match self {
            ModuleType::Md5 => "MD5 Hash",
            ModuleType::Base64Encode => "Base64 Encode",
            ModuleType::Base64Decode => "Base64 Decode",
            ModuleType::TextReplace => "Text Replace",
            ModuleType::UrlEncode => "URL Encode",
            ModuleType::UrlDecode => "URL Decode",
            ModuleType::HttpRequest => "HTTP Request",
            ModuleType::JsonParse => "JSON Parse",
            ModuleType::SetVariable => "Set Variable",
            ModuleType::TextTemplate => "Text Template",
            ModuleType::Notification => "Notification",
            ModuleType::AccountConfig => "Account Config",
            ModuleType::Delay => "Delay",
            ModuleType::AesEncrypt => "AES Encrypt",
            ModuleType::AesDecrypt => "AES Decrypt",
            ModuleType::Condition => "Condition",
            ModuleType::ConditionEnd => "Condition End",
            ModuleType::Repeat => "Repeat",
            ModuleType::RandomNumber => "Random Number",
            ModuleType::Timestamp => "Timestamp",
            ModuleType::SystemProxy => "System Proxy",
            ModuleType::Calculate => "Calculate",
            ModuleType::CheckDomains => "Check Domains",
            ModuleType::NumberFormat => "Number Format",
            ModuleType::Unknown(tag) => tag,
        }
    }
}

impl From<String> for ModuleType {
    fn from(tag: String) -> Self {
        ModuleType::builtin()
            .into_iter()
            .find(|known| known.tag() == tag)
            .unwrap_or(ModuleType::Unknown(tag))
    }
}

impl From<ModuleType> for String {
    fn from(module_type: ModuleType) -> Self {
        match module_type {
            ModuleType::Unknown(tag) => tag,
            known => known.tag().to_string(),
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
