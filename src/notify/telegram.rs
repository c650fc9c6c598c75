//! Telegram bot notifier (`sendMessage`).
//!
//! Settings start from the config file and may be replaced once at startup
//! from a Vault document, so they live behind a lock.

use super::{Notifier, NotifyError};
use crate::config::{Redacted, TelegramConfig};
use crate::constants::TELEGRAM_API_BASE;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelegramSettings {
    pub channel: i64,
    pub token: Redacted,
}

impl TelegramSettings {
    pub fn from_config(config: &TelegramConfig) -> Self {
        Self {
            channel: config.channel,
            token: config.token.clone(),
        }
    }

    /// Read `channel` and `token` from a KV document
    ///
    /// `channel` may be stored as a string or a number.
    pub fn from_document(document: &Map<String, Value>) -> Result<Self, NotifyError> {
        let channel = match document.get("channel") {
            Some(Value::String(raw)) => raw.trim().parse::<i64>().map_err(|e| {
                NotifyError::InvalidSettings(format!("channel {raw:?} is not an integer: {e}"))
            })?,
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                NotifyError::InvalidSettings(format!("channel {n} is not an integer"))
            })?,
            _ => return Err(NotifyError::InvalidSettings("missing channel".to_string())),
        };
        let token = match document.get("token") {
            Some(Value::String(token)) if !token.is_empty() => Redacted::new(token.as_str()),
            _ => return Err(NotifyError::InvalidSettings("missing token".to_string())),
        };
        Ok(Self { channel, token })
    }

    pub fn is_configured(&self) -> bool {
        self.channel != 0 && !self.token.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug)]
struct Inner {
    http_client: Client,
    api_base: String,
    settings: RwLock<TelegramSettings>,
}

impl Inner {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let settings = self.settings.read().await.clone();
        if !settings.is_configured() {
            debug!("Telegram notifier not configured, dropping message");
            return Ok(());
        }

        let url = format!("{}/bot{}/sendMessage", self.api_base, settings.token.expose());
        let response = self
            .http_client
            .post(url)
            .json(&SendMessage {
                chat_id: settings.channel,
                text,
            })
            .send()
            .await
            // The URL carries the bot token
            .map_err(reqwest::Error::without_url)?;

        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    inner: Arc<Inner>,
}

impl TelegramNotifier {
    pub fn new(settings: TelegramSettings) -> Result<Self, NotifyError> {
        let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                api_base: TELEGRAM_API_BASE.to_string(),
                settings: RwLock::new(settings),
            }),
        })
    }

    pub async fn reconfigure(&self, settings: TelegramSettings) {
        *self.inner.settings.write().await = settings;
    }

    pub async fn settings(&self) -> TelegramSettings {
        self.inner.settings.read().await.clone()
    }

    /// Deliver one message and wait for the result
    pub async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        self.inner.send(text).await
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, message: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, dropping notification");
            return;
        };
        let inner = Arc::clone(&self.inner);
        let message = message.to_string();
        handle.spawn(async move {
            if let Err(e) = inner.send(&message).await {
                warn!(error = %e, "Failed to deliver notification");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_settings_from_document_with_string_channel() {
        let settings =
            TelegramSettings::from_document(&document(json!({"channel": "-100123", "token": "bot:abc"})))
                .unwrap();
        assert_eq!(settings.channel, -100_123);
        assert_eq!(settings.token.expose(), "bot:abc");
        assert!(settings.is_configured());
    }

    #[test]
    fn test_settings_from_document_with_numeric_channel() {
        let settings =
            TelegramSettings::from_document(&document(json!({"channel": 42, "token": "t"}))).unwrap();
        assert_eq!(settings.channel, 42);
    }

    #[test]
    fn test_settings_from_document_rejects_bad_values() {
        for doc in [
            json!({"token": "t"}),
            json!({"channel": "abc", "token": "t"}),
            json!({"channel": 1}),
            json!({"channel": 1, "token": ""}),
        ] {
            assert!(TelegramSettings::from_document(&document(doc)).is_err());
        }
    }

    #[test]
    fn test_send_message_payload() {
        let payload = serde_json::to_value(SendMessage {
            chat_id: -5,
            text: "vault-secret-syncer starting",
        })
        .unwrap();
        assert_eq!(
            payload,
            json!({"chat_id": -5, "text": "vault-secret-syncer starting"})
        );
    }

    #[tokio::test]
    async fn test_unconfigured_notifier_is_silent() {
        let notifier = TelegramNotifier::new(TelegramSettings::default()).unwrap();
        assert!(notifier.send_message("hello").await.is_ok());
    }

    #[tokio::test]
    async fn test_reconfigure_replaces_settings() {
        let notifier = TelegramNotifier::new(TelegramSettings::default()).unwrap();
        let settings = TelegramSettings {
            channel: 7,
            token: Redacted::new("t"),
        };
        notifier.reconfigure(settings.clone()).await;
        assert_eq!(notifier.settings().await, settings);
    }
}
