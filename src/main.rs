/// Autoflow: modular workflow automation engine
///
/// Main entry point for the Autoflow server. Loads configuration and starts
/// the HTTP server with workflow management, scheduling and execution.

use autoflow::{config::Config, server::start_server};

/// Application entry point
///
/// Configuration comes from `AUTOFLOW_*` environment variables, optionally
/// overridden by the TOML file named in `AUTOFLOW_CONFIG`. The server provides:
/// - Workflow management API at /api/workflows/*
/// - Notification settings at /api/settings/notifications
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    start_server(config).await
}
