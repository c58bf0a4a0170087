//! Generic webhook sender
//!
//! POSTs a JSON payload with the rendered message plus the raw monitor and
//! heartbeat records, so receivers can do their own formatting.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::model::{ChannelKind, Heartbeat, Monitor};

use super::{NotifyError, Sender};

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,

    #[serde(default)]
    additional_headers: std::collections::HashMap<String, String>,
}

pub struct WebhookSender {
    client: reqwest::Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn parse(config: &str) -> Result<WebhookConfig, NotifyError> {
        let config: WebhookConfig =
            serde_json::from_str(config).map_err(|e| NotifyError::Config(e.to_string()))?;
        if config.url.is_empty() {
            return Err(NotifyError::Config("webhook url must not be empty".to_string()));
        }
        Ok(config)
    }
}

#[async_trait]
impl Sender for WebhookSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn validate(&self, config: &str) -> Result<(), NotifyError> {
        Self::parse(config).map(|_| ())
    }

    async fn send(
        &self,
        config: &str,
        message: &str,
        monitor: &Monitor,
        heartbeat: &Heartbeat,
    ) -> Result<(), NotifyError> {
        let config = Self::parse(config)?;

        let payload = json!({
            "message": message,
            "monitor": monitor,
            "heartbeat": heartbeat,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(&config.url).json(&payload);
        for (name, value) in &config.additional_headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Send(format!(
                "webhook returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
