//! MQTT probe
//!
//! Connects to the broker, subscribes to the configured topic, and waits
//! for one message before the deadline. The payload can additionally be
//! checked for a keyword or a JSON-path value.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use tracing::debug;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult, assert_json_payload};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum MqttCheckType {
    #[default]
    None,
    Keyword,
    JsonQuery,
}

#[derive(Debug, Deserialize)]
struct MqttConfig {
    host: String,

    #[serde(default = "default_port")]
    port: u16,

    topic: String,

    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,

    #[serde(default)]
    check_type: MqttCheckType,

    #[serde(default)]
    keyword: Option<String>,

    #[serde(default)]
    json_path: Option<String>,
    #[serde(default)]
    expected_value: Option<String>,
}

fn default_port() -> u16 {
    1883
}

pub struct MqttProbe;

#[async_trait]
impl Probe for MqttProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Mqtt
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: MqttConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid mqtt config: {e}")),
        };

        let client_id = format!("vigilia-{}", &ctx.monitor.id);
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(5));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 10);
        if let Err(e) = client.subscribe(&config.topic, QoS::AtLeastOnce).await {
            return ProbeResult::down(format!("mqtt subscribe failed: {e}"));
        }

        let start = Instant::now();
        let payload = loop {
            if ctx.token.is_cancelled() {
                return ProbeResult::down("probe cancelled");
            }
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!("mqtt message on {}", publish.topic);
                    break publish.payload.to_vec();
                }
                Ok(_) => continue,
                Err(e) => return ProbeResult::down(format!("mqtt connection failed: {e}")),
            }
        };
        let ping_ms = start.elapsed().as_millis() as u32;

        let text = String::from_utf8_lossy(&payload).to_string();
        match config.check_type {
            MqttCheckType::None => {
                ProbeResult::up(format!("message received on {}", config.topic), ping_ms)
            }
            MqttCheckType::Keyword => {
                let keyword = config.keyword.as_deref().unwrap_or("");
                if keyword.is_empty() {
                    return ProbeResult::down("keyword check requires a keyword");
                }
                if text.contains(keyword) {
                    ProbeResult::up(format!("keyword {keyword:?} found"), ping_ms)
                } else {
                    ProbeResult::down(format!("keyword {keyword:?} not found in message"))
                }
            }
            MqttCheckType::JsonQuery => {
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(e) => return ProbeResult::down(format!("message is not json: {e}")),
                };
                match assert_json_payload(
                    &value,
                    config.json_path.as_deref(),
                    config.expected_value.as_deref(),
                ) {
                    Ok(found) => ProbeResult::up(format!("json query matched: {found}"), ping_ms),
                    Err(msg) => ProbeResult::down(msg),
                }
            }
        }
    }
}
