//! RabbitMQ probe
//!
//! Talks to the management API of one or more cluster nodes; the monitor is
//! Up as soon as any node reports a healthy broker.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

#[derive(Debug, Deserialize)]
struct RabbitmqConfig {
    /// Management API base URLs, e.g. `http://node1:15672`.
    nodes: Vec<String>,

    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

pub struct RabbitmqProbe {
    client: reqwest::Client,
}

impl Default for RabbitmqProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl RabbitmqProbe {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Probe for RabbitmqProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Rabbitmq
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: RabbitmqConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid rabbitmq config: {e}")),
        };

        if config.nodes.is_empty() {
            return ProbeResult::down("rabbitmq config requires at least one management node url");
        }

        let start = Instant::now();
        let mut last_error = String::new();

        for node in &config.nodes {
            let url = format!("{}/api/health/checks/alarms", node.trim_end_matches('/'));
            let response = self
                .client
                .get(&url)
                .basic_auth(&config.username, Some(&config.password))
                .timeout(ctx.deadline)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    return ProbeResult::up(
                        format!("node {node} healthy"),
                        start.elapsed().as_millis() as u32,
                    );
                }
                Ok(response) => {
                    last_error = format!("node {node} returned status {}", response.status());
                    debug!("{last_error}");
                }
                Err(e) => {
                    last_error = format!("node {node} unreachable: {e}");
                    debug!("{last_error}");
                }
            }

            if ctx.token.is_cancelled() {
                return ProbeResult::down("probe cancelled");
            }
        }

        ProbeResult::down(format!("no healthy node: {last_error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Monitor;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn run(config: serde_json::Value) -> ProbeResult {
        let mut monitor = Monitor::new("rabbit test", MonitorKind::Rabbitmq, config.to_string());
        monitor.timeout_secs = 5;
        let ctx = ProbeContext {
            monitor: &monitor,
            proxy: None,
            token: CancellationToken::new(),
            deadline: monitor.timeout(),
        };
        RabbitmqProbe::new().execute(ctx).await
    }

    #[tokio::test]
    async fn test_any_healthy_node_is_up() {
        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&bad)
            .await;

        let good = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/health/checks/alarms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ok"
            })))
            .mount(&good)
            .await;

        let result = run(serde_json::json!({
            "nodes": [bad.uri(), good.uri()],
            "username": "guest",
            "password": "guest",
        }))
        .await;
        assert_eq!(result.status, super::super::ProbeStatus::Up);
    }

    #[tokio::test]
    async fn test_all_nodes_unhealthy_is_down() {
        let bad = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&bad)
            .await;

        let result = run(serde_json::json!({"nodes": [bad.uri()]})).await;
        assert_eq!(result.status, super::super::ProbeStatus::Down);
        assert!(result.message.contains("no healthy node"));
    }

    #[tokio::test]
    async fn test_empty_nodes_is_down() {
        let result = run(serde_json::json!({"nodes": []})).await;
        assert_eq!(result.status, super::super::ProbeStatus::Down);
    }
}
