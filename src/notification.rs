/// Notification delivery
///
/// `ChannelNotifier` sends mail over SMTP (lettre) and pushes through the
/// WxPusher and PushPlus HTTP APIs (reqwest). Channel settings are read from a
/// shared `ArcSwap` so they can be replaced while the engine is running.

use crate::config::{EmailSettings, NotificationSettings, PushPlusSettings, WxPusherSettings};
use crate::error::ModuleError;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{fmt, sync::Arc, time::Duration};
use thiserror::Error;

/// Hot-swappable channel settings shared by the API and the notifier
pub type SharedNotificationSettings = Arc<ArcSwap<NotificationSettings>>;

pub fn shared_settings(settings: NotificationSettings) -> SharedNotificationSettings {
    Arc::new(ArcSwap::from_pointee(settings))
}

pub const WXPUSHER_ENDPOINT: &str = "https://wxpusher.zjiecode.com/api/send/message";
pub const PUSHPLUS_ENDPOINT: &str = "https://www.pushplus.plus/send";

const SMTP_IMPLICIT_TLS_PORT: u16 = 465;
const PUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Email,
    WxPusher,
    PushPlus,
}

impl NotificationKind {
    pub fn parse(value: &str) -> Option<Self> {
        match crate::runtime::modules::option_key(value).as_str() {
            "" | "email" | "mail" => Some(NotificationKind::Email),
            "wxpusher" | "wechat" => Some(NotificationKind::WxPusher),
            "pushplus" | "push_plus" => Some(NotificationKind::PushPlus),
            _ => None,
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationKind::Email => "email",
            NotificationKind::WxPusher => "wxpusher",
            NotificationKind::PushPlus => "pushplus",
        })
    }
}

/// A validated message ready for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub content: String,
    /// Mail address, WxPusher UID or PushPlus topic; `None` only for PushPlus
    pub recipient: Option<String>,
}

impl Notification {
    /// Check channel credentials and pick the destination, falling back to the
    /// channel's configured default recipient
    pub fn prepare(
        kind: NotificationKind,
        title: impl Into<String>,
        content: impl Into<String>,
        to: &str,
        settings: &NotificationSettings,
    ) -> Result<Self, NotifyError> {
        let to = to.trim();
        let pick = |fallback: &str| {
            let chosen = if to.is_empty() { fallback.trim() } else { to };
            (!chosen.is_empty()).then(|| chosen.to_string())
        };

        let recipient = match kind {
            NotificationKind::Email => {
                let email = &settings.email;
                if email.smtp_server.trim().is_empty() || email.smtp_user.trim().is_empty() {
                    return Err(NotifyError::ConfigMissing("email service is not configured".into()));
                }
                Some(pick(&email.default_recipient).ok_or_else(|| {
                    NotifyError::ConfigMissing("no recipient given and no default recipient configured".into())
                })?)
            }
            NotificationKind::WxPusher => {
                let wxpusher = &settings.wxpusher;
                if wxpusher.app_token.trim().is_empty() {
                    return Err(NotifyError::ConfigMissing("WxPusher is not configured".into()));
                }
                Some(pick(&wxpusher.default_uid).ok_or_else(|| {
                    NotifyError::ConfigMissing("no UID given and no default UID configured".into())
                })?)
            }
            NotificationKind::PushPlus => {
                if settings.pushplus.token.trim().is_empty() {
                    return Err(NotifyError::ConfigMissing("PushPlus is not configured".into()));
                }
                pick(&settings.pushplus.topic)
            }
        };

        Ok(Self {
            kind,
            title: title.into(),
            content: content.into(),
            recipient,
        })
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("{0}")]
    ConfigMissing(String),

    #[error("{0}")]
    Delivery(String),
}

impl From<NotifyError> for ModuleError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::ConfigMissing(message) => ModuleError::ConfigMissing(message),
            NotifyError::Delivery(message) => ModuleError::Delivery(message),
        }
    }
}

fn delivery(context: &str, err: impl fmt::Display) -> NotifyError {
    NotifyError::Delivery(format!("{context}: {err}"))
}

/// Delivers a prepared notification; returns a short confirmation
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        notification: &Notification,
        settings: &NotificationSettings,
    ) -> Result<String, NotifyError>;
}

/// Push API endpoints, overridable for local testing
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub wxpusher: String,
    pub pushplus: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            wxpusher: WXPUSHER_ENDPOINT.to_string(),
            pushplus: PUSHPLUS_ENDPOINT.to_string(),
        }
    }
}

/// Production notifier for all channels
pub struct ChannelNotifier {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::with_endpoints(Endpoints::default())
    }

    pub fn with_endpoints(endpoints: Endpoints) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
        }
    }

    async fn send_email(&self, n: &Notification, email: &EmailSettings) -> Result<String, NotifyError> {
        let to = n.recipient.as_deref().unwrap_or_default();
        let sender = if email.sender.trim().is_empty() { &email.smtp_user } else { &email.sender };

        let from: Mailbox = sender.parse().map_err(|e| delivery("invalid sender address", e))?;
        let to: Mailbox = to.parse().map_err(|e| delivery("invalid recipient address", e))?;
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(n.title.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(n.content.clone())
            .map_err(|e| delivery("cannot build message", e))?;

        let builder = if email.smtp_port == SMTP_IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&email.smtp_server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&email.smtp_server)
        }
        .map_err(|e| delivery("invalid SMTP server", e))?;

        let transport = builder
            .port(email.smtp_port)
            .credentials(Credentials::new(
                email.smtp_user.clone(),
                email.smtp_password.clone(),
            ))
            .build();

        transport
            .send(message)
            .await
            .map_err(|e| delivery("email delivery failed", e))?;
        tracing::info!("📧 Email sent via {}:{}", email.smtp_server, email.smtp_port);
        Ok("email sent".into())
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, NotifyError> {
        let response = self
            .http
            .post(url)
            .timeout(PUSH_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| delivery("push request failed", e))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| delivery("push response is not JSON", e))
    }

    async fn send_wxpusher(&self, n: &Notification, wxpusher: &WxPusherSettings) -> Result<String, NotifyError> {
        let body = json!({
            "appToken": wxpusher.app_token,
            "content": n.content,
            "summary": n.title,
            "contentType": 1,
            "uids": [n.recipient.as_deref().unwrap_or_default()],
        });
        let reply = self.post_json(&self.endpoints.wxpusher, &body).await?;
        if reply.get("success").and_then(Value::as_bool) == Some(true) {
            Ok("wxpusher message sent".into())
        } else {
            Err(NotifyError::Delivery(format!("WxPusher rejected the message: {}", reply_message(&reply))))
        }
    }

    async fn send_pushplus(&self, n: &Notification, pushplus: &PushPlusSettings) -> Result<String, NotifyError> {
        let mut body = json!({
            "token": pushplus.token,
            "title": n.title,
            "content": n.content,
            "template": "html",
        });
        if let Some(topic) = &n.recipient {
            body["topic"] = json!(topic);
        }
        let reply = self.post_json(&self.endpoints.pushplus, &body).await?;
        if reply.get("code").and_then(Value::as_i64) == Some(200) {
            Ok("pushplus message sent".into())
        } else {
            Err(NotifyError::Delivery(format!("PushPlus rejected the message: {}", reply_message(&reply))))
        }
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new()
    }
}

fn reply_message(reply: &Value) -> String {
    match reply.get("msg") {
        Some(Value::String(msg)) => msg.clone(),
        Some(other) => other.to_string(),
        None => reply.to_string(),
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn send(
        &self,
        notification: &Notification,
        settings: &NotificationSettings,
    ) -> Result<String, NotifyError> {
        match notification.kind {
            NotificationKind::Email => self.send_email(notification, &settings.email).await,
            NotificationKind::WxPusher => self.send_wxpusher(notification, &settings.wxpusher).await,
            NotificationKind::PushPlus => self.send_pushplus(notification, &settings.pushplus).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::Mutex;

    /// Captures notifications instead of delivering them
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(
            &self,
            notification: &Notification,
            _settings: &NotificationSettings,
        ) -> Result<String, NotifyError> {
            self.sent.lock().await.push(notification.clone());
            Ok("recorded".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use tokio::net::TcpListener;

    fn configured() -> NotificationSettings {
        let mut settings = NotificationSettings::default();
        settings.email.smtp_server = "smtp.example.com".into();
        settings.email.smtp_user = "bot@example.com".into();
        settings.email.default_recipient = "ops@example.com".into();
        settings.wxpusher.app_token = "AT_token".into();
        settings.pushplus.token = "pp".into();
        settings
    }

    #[test]
    fn recipients_fall_back_to_channel_defaults() {
        let settings = configured();
        let mail = Notification::prepare(NotificationKind::Email, "t", "c", "", &settings).unwrap();
        assert_eq!(mail.recipient.as_deref(), Some("ops@example.com"));

        let mail = Notification::prepare(NotificationKind::Email, "t", "c", " me@x.io ", &settings).unwrap();
        assert_eq!(mail.recipient.as_deref(), Some("me@x.io"));

        let push = Notification::prepare(NotificationKind::PushPlus, "t", "c", "", &settings).unwrap();
        assert_eq!(push.recipient, None);
    }

    #[test]
    fn missing_credentials_or_destination_are_config_errors() {
        let empty = NotificationSettings::default();
        for kind in [NotificationKind::Email, NotificationKind::WxPusher, NotificationKind::PushPlus] {
            assert!(matches!(
                Notification::prepare(kind, "t", "c", "someone", &empty),
                Err(NotifyError::ConfigMissing(_))
            ));
        }
        assert!(matches!(
            Notification::prepare(NotificationKind::WxPusher, "t", "c", "", &configured()),
            Err(NotifyError::ConfigMissing(_))
        ));
    }

    #[test]
    fn kinds_parse_from_labels() {
        assert_eq!(NotificationKind::parse("Email"), Some(NotificationKind::Email));
        assert_eq!(NotificationKind::parse("WxPusher"), Some(NotificationKind::WxPusher));
        assert_eq!(NotificationKind::parse("pushplus"), Some(NotificationKind::PushPlus));
        assert_eq!(NotificationKind::parse("fax"), None);
    }

    async fn serve(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn push_channels_check_the_reply() {
        let base = serve(
            Router::new()
                .route(
                    "/wx",
                    post(|Json(body): Json<Value>| async move {
                        let ok = body["uids"][0] == "UID_1";
                        Json(json!({ "success": ok, "msg": "bad uid" }))
                    }),
                )
                .route(
                    "/pp",
                    post(|Json(body): Json<Value>| async move {
                        let code = if body.get("topic").is_none() { 200 } else { 999 };
                        Json(json!({ "code": code, "msg": "topic not found" }))
                    }),
                ),
        )
        .await;
        let mut notifier = ChannelNotifier::with_endpoints(Endpoints {
            wxpusher: format!("{base}/wx"),
            pushplus: format!("{base}/pp"),
        });
        notifier.http = reqwest::Client::builder().no_proxy().build().unwrap();
        let settings = configured();

        let wx = Notification::prepare(NotificationKind::WxPusher, "t", "c", "UID_1", &settings).unwrap();
        assert!(notifier.send(&wx, &settings).await.is_ok());
        let wx = Notification::prepare(NotificationKind::WxPusher, "t", "c", "UID_2", &settings).unwrap();
        match notifier.send(&wx, &settings).await {
            Err(NotifyError::Delivery(message)) => assert!(message.contains("bad uid")),
            other => panic!("unexpected {other:?}"),
        }

        let pp = Notification::prepare(NotificationKind::PushPlus, "t", "c", "", &settings).unwrap();
        assert!(notifier.send(&pp, &settings).await.is_ok());
        let pp = Notification::prepare(NotificationKind::PushPlus, "t", "c", "team", &settings).unwrap();
        assert!(matches!(notifier.send(&pp, &settings).await, Err(NotifyError::Delivery(_))));
    }

    #[test]
    fn settings_swap_in_place() {
        let shared = shared_settings(NotificationSettings::default());
        shared.store(Arc::new(configured()));
        assert_eq!(shared.load().pushplus.token, "pp");
    }
}
