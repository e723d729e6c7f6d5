/// Notification module: validate the channel, then hand off to the `Notifier`

use super::{ModuleContext, ModuleHandler, ModuleOutput};
use crate::error::ModuleError;
use crate::notification::{Notification, NotificationKind, Notifier, SharedNotificationSettings};
use crate::runtime::logger::{truncate, MAX_DETAIL_CHARS};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

pub struct SendNotification {
    notifier: Arc<dyn Notifier>,
    settings: SharedNotificationSettings,
}

impl SendNotification {
    pub fn new(notifier: Arc<dyn Notifier>, settings: SharedNotificationSettings) -> Self {
        Self { notifier, settings }
    }
}

#[async_trait]
impl ModuleHandler for SendNotification {
    async fn execute(&self, ctx: &mut ModuleContext<'_>) -> Result<ModuleOutput, ModuleError> {
        let kind_text = ctx.raw_text("type");
        let kind = NotificationKind::parse(&kind_text).ok_or_else(|| {
            ModuleError::Validation(format!("unsupported notification type '{kind_text}'"))
        })?;

        let settings = self.settings.load_full();
        let notification = Notification::prepare(
            kind,
            ctx.resolve("title"),
            ctx.resolve("content"),
            &ctx.resolve("to"),
            &settings,
        )?;

        ctx.log
            .debug(
                format!("📨 '{}' sending {kind} notification", ctx.module.display_name()),
                Some(json!({
                    "title": notification.title,
                    "content": truncate(&notification.content, MAX_DETAIL_CHARS),
                    "to": notification.recipient,
                })),
            )
            .await;

        let confirmation = self.notifier.send(&notification, &settings).await?;
        ctx.log
            .info(format!("'{}' {confirmation}", ctx.module.display_name()), None)
            .await;
        Ok(ModuleOutput::new(confirmation))
    }
}
