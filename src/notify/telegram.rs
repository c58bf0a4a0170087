//! Telegram sender
//!
//! Uses the Bot API `sendMessage` endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::model::{ChannelKind, Heartbeat, Monitor};

use super::{NotifyError, Sender};

#[derive(Debug, Deserialize)]
struct TelegramConfig {
    bot_token: String,
    chat_id: String,

    #[serde(default = "default_api_base")]
    api_base: String,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

pub struct TelegramSender {
    client: reqwest::Client,
}

impl Default for TelegramSender {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn parse(config: &str) -> Result<TelegramConfig, NotifyError> {
        let config: TelegramConfig =
            serde_json::from_str(config).map_err(|e| NotifyError::Config(e.to_string()))?;
        if config.bot_token.is_empty() || config.chat_id.is_empty() {
            return Err(NotifyError::Config(
                "telegram requires bot_token and chat_id".to_string(),
            ));
        }
        Ok(config)
    }
}

#[async_trait]
impl Sender for TelegramSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn validate(&self, config: &str) -> Result<(), NotifyError> {
        Self::parse(config).map(|_| ())
    }

    async fn send(
        &self,
        config: &str,
        message: &str,
        _monitor: &Monitor,
        _heartbeat: &Heartbeat,
    ) -> Result<(), NotifyError> {
        let config = Self::parse(config)?;

        let url = format!(
            "{}/bot{}/sendMessage",
            config.api_base.trim_end_matches('/'),
            config.bot_token
        );
        let payload = json!({
            "chat_id": config.chat_id,
            "text": message,
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Send(format!(
                "telegram returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MonitorKind, MonitorStatus};
    use chrono::Utc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_validate() {
        let sender = TelegramSender::new();
        assert!(sender.validate(r#"{"bot_token":"t","chat_id":"c"}"#).is_ok());
        assert!(sender.validate(r#"{"bot_token":"","chat_id":"c"}"#).is_err());
    }

    #[tokio::test]
    async fn test_send_hits_bot_api() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botsecret/sendMessage"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sender = TelegramSender::new();
        let monitor = Monitor::new("api", MonitorKind::Http, "{}");
        let heartbeat = Heartbeat::new(&monitor.id, MonitorStatus::Up, Utc::now());
        let config = serde_json::json!({
            "bot_token": "secret",
            "chat_id": "42",
            "api_base": server.uri(),
        })
        .to_string();

        sender.send(&config, "up", &monitor, &heartbeat).await.unwrap();
    }
}
