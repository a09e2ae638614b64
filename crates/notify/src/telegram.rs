//! Run summaries posted to a Telegram chat.
//!
//! The summary body is rendered as legacy Markdown so the default template's
//! backtick block shows up monospaced in the chat.

use std::fmt;

use blockflow_core::config::TelegramConfig;
use serde::Deserialize;

use crate::traits::{Notification, Notifier, NotifyError};

const API_BASE: &str = "https://api.telegram.org";

/// Reply envelope of the Bot API.
#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Posts notifications to one chat through a bot.
pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str) -> Result<Self, NotifyError> {
        let (token, chat_id) = (token.trim(), chat_id.trim());
        if token.is_empty() || chat_id.is_empty() {
            return Err(NotifyError::Config(
                "telegram token and chat_id must both be set".to_string(),
            ));
        }
        Ok(Self {
            token: token.to_string(),
            chat_id: chat_id.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Build from `[notifications.telegram]`. `None` until both the token
    /// and the chat id are filled in.
    pub fn from_settings(settings: &TelegramConfig) -> Result<Option<Self>, NotifyError> {
        match (&settings.token, &settings.chat_id) {
            (Some(token), Some(chat_id)) => Self::new(token, chat_id).map(Some),
            _ => Ok(None),
        }
    }

    fn endpoint(&self) -> String {
        format!("{API_BASE}/bot{}/sendMessage", self.token)
    }

    /// The `sendMessage` body for a run summary.
    fn payload(&self, notification: &Notification) -> serde_json::Value {
        serde_json::json!({
            "chat_id": self.chat_id,
            "text": notification.body,
            "parse_mode": "Markdown",
        })
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::debug!(chat_id = %self.chat_id, subject = %notification.subject, "posting run summary");

        let reply: ApiReply = self
            .client
            .post(self.endpoint())
            .json(&self.payload(notification))
            .send()
            .await?
            .json()
            .await?;

        if reply.ok {
            tracing::info!(chat_id = %self.chat_id, "run summary delivered");
            Ok(())
        } else {
            Err(NotifyError::Rejected(
                reply.description.unwrap_or_else(|| "no description".to_string()),
            ))
        }
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templating::{RunReport, DEFAULT_SUMMARY_TEMPLATE};

    fn settings(token: Option<&str>, chat_id: Option<&str>) -> TelegramConfig {
        TelegramConfig {
            token: token.map(str::to_string),
            chat_id: chat_id.map(str::to_string),
        }
    }

    #[test]
    fn unset_or_partial_settings_disable_the_channel() {
        assert!(TelegramNotifier::from_settings(&settings(None, None)).unwrap().is_none());
        assert!(TelegramNotifier::from_settings(&settings(Some("1:ab"), None)).unwrap().is_none());
        assert!(TelegramNotifier::from_settings(&settings(None, Some("42"))).unwrap().is_none());
    }

    #[test]
    fn blank_values_are_a_config_error() {
        let err = TelegramNotifier::from_settings(&settings(Some("  "), Some("42"))).unwrap_err();
        assert!(matches!(err, NotifyError::Config(_)));
    }

    #[test]
    fn summary_is_posted_as_markdown() {
        let notifier = TelegramNotifier::from_settings(&settings(Some("123:ABC"), Some("-100123")))
            .unwrap()
            .unwrap();
        assert_eq!(notifier.endpoint(), "https://api.telegram.org/bot123:ABC/sendMessage");

        let report = RunReport::new("sweep.rs", 4, 75.0, 1);
        let notification = report.to_notification(DEFAULT_SUMMARY_TEMPLATE).unwrap();
        let payload = notifier.payload(&notification);
        assert_eq!(payload["chat_id"], "-100123");
        assert_eq!(payload["parse_mode"], "Markdown");
        let text = payload["text"].as_str().unwrap();
        assert!(text.starts_with("`Simulation finished:"));
        assert!(text.contains("1/4 failures"));
    }

    #[test]
    fn debug_output_hides_the_token() {
        let notifier = TelegramNotifier::new("123:SECRET", "42").unwrap();
        let shown = format!("{notifier:?}");
        assert!(shown.contains("42"));
        assert!(!shown.contains("SECRET"));
    }
}
