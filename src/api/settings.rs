/// Notification settings endpoints
///
/// Replacing the settings swaps them atomically; runs already in flight keep
/// the snapshot they loaded.

use crate::api::workflows::AppState;
use crate::config::NotificationSettings;
use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;

pub fn create_settings_routes() -> Router<AppState> {
    Router::new().route(
        "/api/settings/notifications",
        get(get_notification_settings).put(put_notification_settings),
    )
}

/// GET /api/settings/notifications
async fn get_notification_settings(State(state): State<AppState>) -> Json<NotificationSettings> {
    Json(NotificationSettings::clone(&state.notification_settings.load()))
}

/// PUT /api/settings/notifications
async fn put_notification_settings(
    State(state): State<AppState>,
    Json(settings): Json<NotificationSettings>,
) -> Json<NotificationSettings> {
    state.notification_settings.store(Arc::new(settings.clone()));
    tracing::info!("🔔 Notification settings updated");
    Json(settings)
}
