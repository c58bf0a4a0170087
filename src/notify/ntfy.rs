//! ntfy sender
//!
//! Publishes to a topic on an ntfy server; priority maps from the beat
//! status.

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::{ChannelKind, Heartbeat, Monitor, MonitorStatus};

use super::{NotifyError, Sender};

#[derive(Debug, Deserialize)]
struct NtfyConfig {
    #[serde(default = "default_server")]
    server: String,

    topic: String,

    #[serde(default)]
    token: Option<String>,
}

fn default_server() -> String {
    "https://ntfy.sh".to_string()
}

pub struct NtfySender {
    client: reqwest::Client,
}

impl Default for NtfySender {
    fn default() -> Self {
        Self::new()
    }
}

impl NtfySender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn parse(config: &str) -> Result<NtfyConfig, NotifyError> {
        let config: NtfyConfig =
            serde_json::from_str(config).map_err(|e| NotifyError::Config(e.to_string()))?;
        if config.topic.is_empty() {
            return Err(NotifyError::Config("ntfy topic must not be empty".to_string()));
        }
        Ok(config)
    }
}

#[async_trait]
impl Sender for NtfySender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Ntfy
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

        let url = format!("{}/{}", config.server.trim_end_matches('/'), config.topic);
        let priority = match heartbeat.status {
            MonitorStatus::Down => "high",
            _ => "default",
        };

        let mut request = self
            .client
            .post(&url)
            .header("Title", monitor.name.clone())
            .header("Priority", priority)
            .body(message.to_string());
        if let Some(token) = &config.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Send(format!(
                "ntfy returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
