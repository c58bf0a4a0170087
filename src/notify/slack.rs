//! Slack sender
//!
//! Posts to an incoming-webhook URL using the plain `text` payload form.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::model::{ChannelKind, Heartbeat, Monitor};

use super::{NotifyError, Sender};

#[derive(Debug, Deserialize)]
struct SlackConfig {
    url: String,

    #[serde(default)]
    channel: Option<String>,

    #[serde(default)]
    username: Option<String>,
}

pub struct SlackSender {
    client: reqwest::Client,
}

impl Default for SlackSender {
    fn default() -> Self {
        Self::new()
    }
}

impl SlackSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn parse(config: &str) -> Result<SlackConfig, NotifyError> {
        let config: SlackConfig =
            serde_json::from_str(config).map_err(|e| NotifyError::Config(e.to_string()))?;
        if config.url.is_empty() {
            return Err(NotifyError::Config("slack webhook url must not be empty".to_string()));
        }
        Ok(config)
    }
}

#[async_trait]
impl Sender for SlackSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Slack
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

        let mut payload = json!({ "text": message });
        if let Some(channel) = &config.channel {
            payload["channel"] = json!(channel);
        }
        if let Some(username) = &config.username {
            payload["username"] = json!(username);
        }

        let response = self
            .client
            .post(&config.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Send(format!(
                "slack returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
