/// Run logging: every event goes to `tracing` and to the persistent log sink
///
/// Sink failures are traced and swallowed so logging never fails a run.

use crate::storage::{LogLevel, LogSink, SYSTEM_SOURCE};
use serde_json::Value;
use std::sync::Arc;

/// Longest text kept in log details
pub const MAX_DETAIL_CHARS: usize = 1000;

/// Logger bound to one source (a workflow id or `system`)
#[derive(Clone)]
pub struct WorkflowLogger {
    sink: Arc<dyn LogSink>,
    source: String,
}

impl WorkflowLogger {
    pub fn new(sink: Arc<dyn LogSink>, source: impl Into<String>) -> Self {
        Self {
            sink,
            source: source.into(),
        }
    }

    pub fn system(sink: Arc<dyn LogSink>) -> Self {
        Self::new(sink, SYSTEM_SOURCE)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub async fn log(&self, level: LogLevel, message: impl Into<String>, details: Option<Value>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!("[{}] {}", self.source, message),
            LogLevel::Info => tracing::info!("[{}] {}", self.source, message),
            LogLevel::Warning => tracing::warn!("[{}] {}", self.source, message),
            LogLevel::Error => tracing::error!("[{}] {}", self.source, message),
        }

        if let Err(e) = self.sink.append(level, &self.source, &message, details).await {
            tracing::warn!("⚠️ Failed to persist log entry for {}: {}", self.source, e);
        }
    }

    pub async fn debug(&self, message: impl Into<String>, details: Option<Value>) {
        self.log(LogLevel::Debug, message, details).await
    }

    pub async fn info(&self, message: impl Into<String>, details: Option<Value>) {
        self.log(LogLevel::Info, message, details).await
    }

    pub async fn warning(&self, message: impl Into<String>, details: Option<Value>) {
        self.log(LogLevel::Warning, message, details).await
    }

    pub async fn error(&self, message: impl Into<String>, details: Option<Value>) {
        self.log(LogLevel::Error, message, details).await
    }
}

/// Cut `text` to `max` characters, marking the cut with `...`
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
