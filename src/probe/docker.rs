//! Docker container probe
//!
//! Inspects a container over the local socket (or a configured daemon
//! address): Up iff the container is running and, when the image defines a
//! health check, that check reports healthy.

use std::time::Instant;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::InspectContainerOptions;
use bollard::models::HealthStatusEnum;
use serde::Deserialize;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

#[derive(Debug, Deserialize)]
struct DockerConfig {
    /// Container name or id.
    container: String,

    /// Unix socket path or `http://host:port`; empty uses the platform
    /// default.
    #[serde(default)]
    connection: String,
}

pub struct DockerProbe;

#[async_trait]
impl Probe for DockerProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Docker
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: DockerConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid docker config: {e}")),
        };

        let timeout_secs = ctx.deadline.as_secs().max(1);
        let docker = if config.connection.is_empty() {
            Docker::connect_with_local_defaults()
        } else if config.connection.starts_with("http") {
            Docker::connect_with_http(
                &config.connection,
                timeout_secs,
                bollard::API_DEFAULT_VERSION,
            )
        } else {
            Docker::connect_with_socket(
                &config.connection,
                timeout_secs,
                bollard::API_DEFAULT_VERSION,
            )
        };

        let docker = match docker {
            Ok(docker) => docker,
            Err(e) => return ProbeResult::down(format!("docker connect failed: {e}")),
        };

        let start = Instant::now();
        let inspect = match docker
            .inspect_container(&config.container, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) => {
                return ProbeResult::down(format!(
                    "inspect of container {:?} failed: {e}",
                    config.container
                ));
            }
        };
        let ping_ms = start.elapsed().as_millis() as u32;

        let Some(state) = inspect.state else {
            return ProbeResult::down("container state unavailable");
        };

        if !state.running.unwrap_or(false) {
            let status = state
                .status
                .map(|s| format!("{s:?}"))
                .unwrap_or_else(|| "unknown".to_string());
            return ProbeResult::down(format!("container is not running ({status})"));
        }

        if let Some(health) = state.health {
            match health.status {
                Some(HealthStatusEnum::HEALTHY) | Some(HealthStatusEnum::NONE) | None => {}
                Some(other) => {
                    return ProbeResult::down(format!("container health is {other:?}"));
                }
            }
        }

        ProbeResult::up("container is running", ping_ms)
    }
}
