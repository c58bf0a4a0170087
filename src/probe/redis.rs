//! Redis probe
//!
//! PINGs the server (or runs a configured command) over a fresh
//! connection.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

#[derive(Debug, Deserialize)]
struct RedisConfig {
    /// e.g. `redis://:password@host:6379/0`
    connection_string: String,

    /// Optional command, space-separated (defaults to PING).
    #[serde(default)]
    command: Option<String>,
}

pub struct RedisProbe;

#[async_trait]
impl Probe for RedisProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Redis
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: RedisConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid redis config: {e}")),
        };

        let client = match redis::Client::open(config.connection_string.as_str()) {
            Ok(client) => client,
            Err(e) => return ProbeResult::down(format!("invalid connection string: {e}")),
        };

        let start = Instant::now();
        let mut connection = match client.get_multiplexed_async_connection().await {
            Ok(connection) => connection,
            Err(e) => return ProbeResult::down(format!("redis connect failed: {e}")),
        };

        let mut parts = config
            .command
            .as_deref()
            .unwrap_or("PING")
            .split_whitespace();
        let Some(name) = parts.next() else {
            return ProbeResult::down("redis command must not be empty");
        };
        let mut cmd = redis::cmd(name);
        for arg in parts {
            cmd.arg(arg);
        }

        let outcome: Result<redis::Value, redis::RedisError> =
            cmd.query_async(&mut connection).await;
        match outcome {
            Ok(value) => ProbeResult::up(
                format!("{name} -> {value:?}"),
                start.elapsed().as_millis() as u32,
            ),
            Err(e) => ProbeResult::down(format!("redis command failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Monitor;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_invalid_connection_string_is_down() {
        let mut monitor = Monitor::new(
            "redis test",
            MonitorKind::Redis,
            serde_json::json!({"connection_string": "not-a-redis-url"}).to_string(),
        );
        monitor.timeout_secs = 2;

        let ctx = ProbeContext {
            monitor: &monitor,
            proxy: None,
            token: CancellationToken::new(),
            deadline: monitor.timeout(),
        };
        let result = RedisProbe.execute(ctx).await;
        assert_eq!(result.status, super::super::ProbeStatus::Down);
    }
}
