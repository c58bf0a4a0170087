//! MongoDB probe
//!
//! Runs `ping` (or a configured command) against the admin database.

use std::time::Instant;

use async_trait::async_trait;
use mongodb::Client;
use mongodb::bson::{Document, doc};
use mongodb::options::ClientOptions;
use serde::Deserialize;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult, assert_json_payload};

#[derive(Debug, Deserialize)]
struct MongoConfig {
    connection_string: String,

    /// Optional database command as JSON (defaults to `{"ping": 1}`).
    #[serde(default)]
    command: Option<serde_json::Value>,

    #[serde(default)]
    json_path: Option<String>,
    #[serde(default)]
    expected_value: Option<String>,
}

pub struct MongoProbe;

#[async_trait]
impl Probe for MongoProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Mongodb
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: MongoConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid mongodb config: {e}")),
        };

        let mut options = match ClientOptions::parse(&config.connection_string).await {
            Ok(options) => options,
            Err(e) => return ProbeResult::down(format!("invalid connection string: {e}")),
        };
        options.server_selection_timeout = Some(ctx.deadline);
        options.connect_timeout = Some(ctx.deadline);

        let client = match Client::with_options(options) {
            Ok(client) => client,
            Err(e) => return ProbeResult::down(format!("mongodb client error: {e}")),
        };

        let command: Document = match &config.command {
            Some(value) => match mongodb::bson::to_document(value) {
                Ok(doc) => doc,
                Err(e) => return ProbeResult::down(format!("invalid command document: {e}")),
            },
            None => doc! { "ping": 1 },
        };

        let start = Instant::now();
        match client.database("admin").run_command(command).await {
            Ok(reply) => {
                let ping_ms = start.elapsed().as_millis() as u32;
                if config.json_path.as_deref().is_some_and(|p| !p.is_empty()) {
                    let json: serde_json::Value = match serde_json::to_value(&reply) {
                        Ok(json) => json,
                        Err(e) => {
                            return ProbeResult::down(format!("reply not representable: {e}"));
                        }
                    };
                    return match assert_json_payload(
                        &json,
                        config.json_path.as_deref(),
                        config.expected_value.as_deref(),
                    ) {
                        Ok(found) => {
                            ProbeResult::up(format!("assertion matched: {found}"), ping_ms)
                        }
                        Err(msg) => ProbeResult::down(msg),
                    };
                }
                ProbeResult::up("command succeeded", ping_ms)
            }
            Err(e) => ProbeResult::down(format!("mongodb command failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Monitor;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_malformed_config_is_down() {
        let monitor = Monitor::new("mongo test", MonitorKind::Mongodb, "null");
        let ctx = ProbeContext {
            monitor: &monitor,
            proxy: None,
            token: CancellationToken::new(),
            deadline: monitor.timeout(),
        };
        let result = MongoProbe.execute(ctx).await;
        assert_eq!(result.status, super::super::ProbeStatus::Down);
        assert!(result.message.contains("invalid mongodb config"));
    }
}
