//! Outbound account notifications (verification and welcome emails).
//!
//! Delivery is abstracted behind [`Notifier`]. The orchestrator decides whether
//! a failed send matters; sinks only report success or failure.
//!
//! The default sink for local dev is [`LogNotifier`], which logs the message
//! (including the verification link) and returns `Ok(())`. [`WebhookNotifier`]
//! hands the rendered message to an external mail relay over HTTP.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::config::{NotificationConfig, ServerConfig};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid link base URL: {0}")]
    Url(String),

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// Rendered message handed to a delivery backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: String,
    pub template: &'static str,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_verification(
        &self,
        email: &str,
        username: &str,
        token: &str,
    ) -> Result<(), NotifyError>;

    async fn send_welcome(&self, email: &str, username: &str) -> Result<(), NotifyError>;
}

/// Renders notification messages; shared by the concrete sinks.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    public_url: Url,
    from: String,
    link_ttl_seconds: u64,
}

/// "24 hours", "30 minutes", "3 days"; falls back to seconds for odd values.
fn describe_ttl(secs: u64) -> String {
    let (n, unit) = if secs >= 3 * 86_400 && secs % 86_400 == 0 {
        (secs / 86_400, "day")
    } else if secs >= 3_600 && secs % 3_600 == 0 {
        (secs / 3_600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if n == 1 {
        format!("1 {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

impl MessageRenderer {
    pub fn new(
        server: &ServerConfig,
        notifications: &NotificationConfig,
        link_ttl_seconds: u64,
    ) -> Result<Self, NotifyError> {
        let mut public_url =
            Url::parse(&server.public_url).map_err(|e| NotifyError::Url(e.to_string()))?;
        // Url::join drops the last path segment unless it ends in a slash
        if !public_url.path().ends_with('/') {
            public_url.set_path(&format!("{}/", public_url.path()));
        }

        Ok(Self {
            public_url,
            from: notifications.from_address.clone(),
            link_ttl_seconds,
        })
    }

    pub fn verification_link(&self, token: &str) -> Result<Url, NotifyError> {
        self.public_url
            .join("api/auth/verify-email/")
            .and_then(|base| base.join(token))
            .map_err(|e| NotifyError::Url(e.to_string()))
    }

    pub fn verification(&self, email: &str, username: &str, token: &str) -> Result<EmailMessage, NotifyError> {
        let link = self.verification_link(token)?;
        let expires_in = describe_ttl(self.link_ttl_seconds);
        Ok(EmailMessage {
            from: self.from.clone(),
            to: email.to_string(),
            template: "verify-email",
            subject: "Verify your email address".to_string(),
            body: format!(
                "Hi {username},\n\nPlease confirm your email address by opening the link below. \
                 The link expires in {expires_in}.\n\n{link}\n"
            ),
        })
    }

    #[must_use]
    pub fn welcome(&self, email: &str, username: &str) -> EmailMessage {
        EmailMessage {
            from: self.from.clone(),
            to: email.to_string(),
            template: "welcome",
            subject: "Welcome!".to_string(),
            body: format!("Hi {username},\n\nYour email address is verified. Welcome aboard!\n"),
        }
    }
}

/// Logs messages instead of delivering them.
#[derive(Debug, Clone)]
pub struct LogNotifier {
    renderer: MessageRenderer,
}

impl LogNotifier {
    #[must_use]
    pub const fn new(renderer: MessageRenderer) -> Self {
        Self { renderer }
    }

    fn log(message: &EmailMessage) {
        info!(
            to_email = %message.to,
            template = message.template,
            subject = %message.subject,
            body = %message.body,
            "email send stub"
        );
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_verification(
        &self,
        email: &str,
        username: &str,
        token: &str,
    ) -> Result<(), NotifyError> {
        Self::log(&self.renderer.verification(email, username, token)?);
        Ok(())
    }

    async fn send_welcome(&self, email: &str, username: &str) -> Result<(), NotifyError> {
        Self::log(&self.renderer.welcome(email, username));
        Ok(())
    }
}

/// POSTs each message as JSON to a mail relay; any non-2xx reply is a failure.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    renderer: MessageRenderer,
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(renderer: MessageRenderer, config: &NotificationConfig) -> Result<Self, NotifyError> {
        let url = config
            .webhook_url
            .as_deref()
            .ok_or_else(|| NotifyError::Url("webhook_url is not set".to_string()))
            .and_then(|u| Url::parse(u).map_err(|e| NotifyError::Url(e.to_string())))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Delivery(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            renderer,
            client,
            url,
        })
    }

    async fn post(&self, message: &EmailMessage) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "mail relay returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_verification(
        &self,
        email: &str,
        username: &str,
        token: &str,
    ) -> Result<(), NotifyError> {
        let message = self.renderer.verification(email, username, token)?;
        self.post(&message).await
    }

    async fn send_welcome(&self, email: &str, username: &str) -> Result<(), NotifyError> {
        self.post(&self.renderer.welcome(email, username)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(public_url: &str) -> MessageRenderer {
        let server = ServerConfig {
            public_url: public_url.to_string(),
            ..ServerConfig::default()
        };
        MessageRenderer::new(&server, &NotificationConfig::default(), 86_400).unwrap()
    }

    #[test]
    fn verification_link_keeps_base_path() {
        let link = renderer("https://auth.example.com/base")
            .verification_link("abc123")
            .unwrap();
        assert_eq!(
            link.as_str(),
            "https://auth.example.com/base/api/auth/verify-email/abc123"
        );

        let link = renderer("http://localhost:8080").verification_link("t").unwrap();
        assert_eq!(link.as_str(), "http://localhost:8080/api/auth/verify-email/t");
    }

    #[test]
    fn verification_message_embeds_link() {
        let message = renderer("http://localhost:8080")
            .verification("alice@x.com", "alice", "tok")
            .unwrap();
        assert_eq!(message.to, "alice@x.com");
        assert_eq!(message.template, "verify-email");
        assert!(message.body.contains("http://localhost:8080/api/auth/verify-email/tok"));
        assert!(message.body.contains("alice"));
        assert!(message.body.contains("expires in 24 hours"));
    }

    #[test]
    fn verification_message_uses_configured_lifetime() {
        let server = ServerConfig::default();
        let notifications = NotificationConfig::default();

        let short = MessageRenderer::new(&server, &notifications, 30 * 60).unwrap();
        let body = short.verification("a@b.c", "a", "t").unwrap().body;
        assert!(body.contains("expires in 30 minutes"), "{body}");

        let long = MessageRenderer::new(&server, &notifications, 7 * 86_400).unwrap();
        let body = long.verification("a@b.c", "a", "t").unwrap().body;
        assert!(body.contains("expires in 7 days"), "{body}");
    }

    #[test]
    fn describe_ttl_picks_readable_unit() {
        assert_eq!(describe_ttl(3_600), "1 hour");
        assert_eq!(describe_ttl(86_400), "24 hours");
        assert_eq!(describe_ttl(90), "90 seconds");
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notifier = LogNotifier::new(renderer("http://localhost:8080"));
        assert!(notifier.send_verification("a@b.c", "a", "t").await.is_ok());
        assert!(notifier.send_welcome("a@b.c", "a").await.is_ok());
    }

    #[test]
    fn webhook_requires_url() {
        let result = WebhookNotifier::new(
            renderer("http://localhost:8080"),
            &NotificationConfig::default(),
        );
        assert!(result.is_err());
    }
}
