/// Configuration management for the Autoflow engine
///
/// Handles server configuration, storage location, log retention and
/// notification channel credentials. Defaults come from `AUTOFLOW_*`
/// environment variables; a TOML file named by `AUTOFLOW_CONFIG` overrides them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Tracing filter and persistent log retention
    pub logging: LoggingConfig,
    /// Notification channels used by notification modules
    pub notifications: NotificationSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `autoflow.db` (default: "data")
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    pub level: String,
    /// Persistent log entries kept per class (system / workflow); 0 keeps all
    pub max_entries: u64,
}

/// Credentials and default recipients of every notification channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub email: EmailSettings,
    pub wxpusher: WxPusherSettings,
    pub pushplus: PushPlusSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub smtp_server: String,
    /// 465 connects with implicit TLS, anything else with STARTTLS
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    /// From address; falls back to `smtp_user`
    pub sender: String,
    pub default_recipient: String,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_server: String::new(),
            smtp_port: 465,
            smtp_user: String::new(),
            smtp_password: String::new(),
            sender: String::new(),
            default_recipient: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WxPusherSettings {
    pub app_token: String,
    pub default_uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushPlusSettings {
    pub token: String,
    /// Group topic used when a module names no recipient
    pub topic: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: env_or("AUTOFLOW_HOST", "0.0.0.0"),
            port: env_or("AUTOFLOW_PORT", "3004").parse().unwrap_or(3004),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: env_or("AUTOFLOW_DATA_DIR", "data"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: env_or("AUTOFLOW_LOG_LEVEL", "info"),
            max_entries: env_or("AUTOFLOW_LOG_MAX_ENTRIES", "1000").parse().unwrap_or(1000),
        }
    }
}

impl Config {
    /// Environment defaults, overridden by the TOML file at `AUTOFLOW_CONFIG` if set
    pub fn load() -> Result<Self> {
        match std::env::var("AUTOFLOW_CONFIG") {
            Ok(path) if !path.trim().is_empty() => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {path}"))?;
                Self::from_toml(&text).with_context(|| format!("Invalid config file {path}"))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Parse a TOML document; missing sections and keys keep their defaults
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
