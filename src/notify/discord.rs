//! Discord sender
//!
//! Posts an embed to a Discord webhook, optionally mentioning a user.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::{ChannelKind, Heartbeat, Monitor, MonitorStatus};

use super::{NotifyError, Sender};

const COLOR_RED: u32 = 15158332;
const COLOR_GREEN: u32 = 3066993;
const COLOR_BLUE: u32 = 5793266;

#[derive(Debug, Deserialize)]
struct DiscordConfig {
    url: String,

    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

/// Build the embed for a heartbeat notification.
fn build_embed(message: &str, monitor: &Monitor, heartbeat: &Heartbeat) -> Embed {
    let (title, color) = match heartbeat.status {
        MonitorStatus::Up => ("✅ Monitor Up", COLOR_GREEN),
        MonitorStatus::Down => ("🔴 Monitor Down", COLOR_RED),
        MonitorStatus::Pending | MonitorStatus::Maintenance => ("ℹ️ Monitor Update", COLOR_BLUE),
    };

    let mut fields = vec![
        EmbedField {
            name: "Monitor".to_string(),
            value: monitor.name.clone(),
            inline: true,
        },
        EmbedField {
            name: "Status".to_string(),
            value: heartbeat.status.as_str().to_uppercase(),
            inline: true,
        },
    ];
    if heartbeat.status == MonitorStatus::Up {
        fields.push(EmbedField {
            name: "Latency".to_string(),
            value: format!("{} ms", heartbeat.ping_ms),
            inline: true,
        });
    }
    if !heartbeat.msg.is_empty() {
        fields.push(EmbedField {
            name: "Message".to_string(),
            value: format!("`{}`", heartbeat.msg),
            inline: false,
        });
    }

    Embed {
        title: Some(title.to_string()),
        description: Some(message.to_string()),
        color: Some(color),
        fields,
        footer: Some(EmbedFooter {
            text: "Uptime Monitoring".to_string(),
        }),
        timestamp: Some(Utc::now().to_rfc3339()),
    }
}

pub struct DiscordSender {
    client: reqwest::Client,
}

impl Default for DiscordSender {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscordSender {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn parse(config: &str) -> Result<DiscordConfig, NotifyError> {
        let config: DiscordConfig =
            serde_json::from_str(config).map_err(|e| NotifyError::Config(e.to_string()))?;
        if config.url.is_empty() {
            return Err(NotifyError::Config("discord webhook url must not be empty".to_string()));
        }
        Ok(config)
    }
}

#[async_trait]
impl Sender for DiscordSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Discord
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

        let content = config.user_id.as_ref().map(|user_id| {
            let emoji = match heartbeat.status {
                MonitorStatus::Up => "✅",
                _ => "🔴",
            };
            format!("{emoji} `{}` <@{user_id}>", monitor.name)
        });

        let payload = Message {
            content,
            embeds: vec![build_embed(message, monitor, heartbeat)],
        };

        let response = self
            .client
            .post(&config.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Send(format!(
                "discord returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}
