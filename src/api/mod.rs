/// HTTP API Layer
///
/// This module provides the REST API endpoints. It handles:
/// - Workflow CRUD operations with schedule re-sync
/// - Manual runs, next fire time and run logs
/// - Live notification channel settings

// Workflow management endpoints (POST/GET/PUT/DELETE, run, next-run, logs)
pub mod workflows;

// Notification settings endpoints
pub mod settings;

// Re-export router builders
pub use settings::create_settings_routes;
pub use workflows::{create_workflow_routes, AppState};
