/// Server setup and initialization
///
/// Wires together all components: storage, notifier, module executor,
/// execution engine, scheduler and HTTP routes.

use crate::{
    api::{create_settings_routes, create_workflow_routes, AppState},
    config::Config,
    notification::{shared_settings, ChannelNotifier},
    runtime::{
        engine::ExecutionEngine, executor::ModuleExecutor, modules::ModuleServices,
        scheduler::SchedulerService,
    },
    storage::{Database, LogSink},
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Application router over an already-wired state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        // Workflow management API routes
        .merge(create_workflow_routes())
        // Notification channel settings
        .merge(create_settings_routes())
        .with_state(state)
}

/// Build every component from configuration and start the scheduler
///
/// Returns the router and the scheduler so the caller can stop it on shutdown.
pub async fn create_app(config: &Config) -> Result<(Router, SchedulerService)> {
    tracing::info!("📁 Opening storage in {}", config.storage.data_dir);
    let database = Database::open(&config.storage.data_dir)
        .await
        .context("Failed to open database")?;

    let store = Arc::new(database.workflows());
    let logs: Arc<dyn LogSink> = Arc::new(database.logs(config.logging.max_entries as usize));

    tracing::info!("⚙️ Initializing module executor");
    let notification_settings = shared_settings(config.notifications.clone());
    let services = ModuleServices {
        notifier: Arc::new(ChannelNotifier::new()),
        notification_settings: Arc::clone(&notification_settings),
        accounts: Arc::new(database.accounts()),
    };
    let executor = Arc::new(ModuleExecutor::with_builtin_modules(&services));

    tracing::info!("🚀 Initializing execution engine");
    let engine = Arc::new(ExecutionEngine::new(
        executor,
        Arc::new(database.variables()),
        Arc::clone(&logs),
    ));

    tracing::info!("⏰ Initializing scheduler service");
    let scheduler = SchedulerService::new(store.clone(), engine, Arc::clone(&logs))
        .await
        .context("Failed to initialize scheduler")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    let state = AppState {
        store,
        scheduler: scheduler.clone(),
        logs,
        notification_settings,
    };

    tracing::info!("✅ Application initialized successfully");
    Ok((create_router(state), scheduler))
}

/// Start the HTTP server with the given configuration
///
/// Serves until Ctrl-C, then stops the scheduler.
pub async fn start_server(config: Config) -> Result<()> {
    // Initialize tracing subscriber; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Autoflow server...");

    let (app, scheduler) = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationSettings;
    use crate::storage::{MemoryLogSink, MemoryVariableStore, MemoryWorkflowStore};
    use serde_json::{json, Value};

    async fn spawn_app() -> String {
        let store = Arc::new(MemoryWorkflowStore::new());
        let logs: Arc<dyn LogSink> = Arc::new(MemoryLogSink::new(0));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::new(ModuleExecutor::new()),
            Arc::new(MemoryVariableStore::new()),
            Arc::clone(&logs),
        ));
        let scheduler = SchedulerService::new(store.clone(), engine, Arc::clone(&logs))
            .await
            .unwrap();
        let app = create_router(AppState {
            store,
            scheduler,
            logs,
            notification_settings: shared_settings(NotificationSettings::default()),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn workflow_lifecycle_over_http() {
        let base = spawn_app().await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let health = client.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let created = client
            .post(format!("{base}/api/workflows"))
            .json(&json!({ "workflow": { "name": "daily", "enabled": true, "cron": "0 6 * * *" } }))
            .send()
            .await
            .unwrap();
        assert_eq!(created.status(), 201);
        let created: Value = created.json().await.unwrap();
        assert_eq!(created["scheduled"], json!(true));
        let id = created["id"].as_str().unwrap().to_string();

        let fetched: Value = client
            .get(format!("{base}/api/workflows/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(fetched["name"], json!("daily"));
        assert_eq!(fetched["retry_interval"], json!(5));

        let invalid = client
            .put(format!("{base}/api/workflows/{id}"))
            .json(&json!({ "workflow": { "name": "daily", "enabled": true, "cron": "whenever" } }))
            .send()
            .await
            .unwrap();
        assert_eq!(invalid.status(), 422);

        let run = client
            .post(format!("{base}/api/workflows/{id}/run"))
            .send()
            .await
            .unwrap();
        assert_eq!(run.status(), 202);

        let deleted = client
            .delete(format!("{base}/api/workflows/{id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), 200);
        let missing = client
            .get(format!("{base}/api/workflows/{id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn notification_settings_are_replaced_live() {
        let base = spawn_app().await;
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let updated: Value = client
            .put(format!("{base}/api/settings/notifications"))
            .json(&json!({ "pushplus": { "token": "pp-1" } }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["pushplus"]["token"], json!("pp-1"));
        assert_eq!(updated["email"]["smtp_port"], json!(465));

        let current: Value = client
            .get(format!("{base}/api/settings/notifications"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(current, updated);
    }
}
