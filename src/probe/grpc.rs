//! gRPC health probe
//!
//! Drives the standard health-checking protocol
//! (`grpc.health.v1.Health/Check`). The optional keyword is matched against
//! the textual serving status, with `invert` flipping the assertion.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tonic::transport::Endpoint;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

#[derive(Debug, Deserialize)]
struct GrpcConfig {
    /// e.g. `http://host:50051` (or `https://` with `tls: true`).
    url: String,

    /// Service name to query; empty checks overall server health.
    #[serde(default)]
    service: String,

    #[serde(default)]
    tls: bool,

    #[serde(default)]
    keyword: Option<String>,
    #[serde(default)]
    invert: bool,
}

pub struct GrpcProbe;

#[async_trait]
impl Probe for GrpcProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Grpc
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: GrpcConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid grpc config: {e}")),
        };

        if config.tls && !config.url.starts_with("https://") {
            return ProbeResult::down("tls enabled but url does not use https://");
        }

        let endpoint = match Endpoint::from_shared(config.url.clone()) {
            Ok(endpoint) => endpoint
                .connect_timeout(ctx.deadline)
                .timeout(ctx.deadline),
            Err(e) => return ProbeResult::down(format!("invalid url {:?}: {e}", config.url)),
        };

        let start = Instant::now();
        let channel = match endpoint.connect().await {
            Ok(channel) => channel,
            Err(e) => return ProbeResult::down(format!("grpc connect failed: {e}")),
        };

        let mut client = HealthClient::new(channel);
        let request = HealthCheckRequest {
            service: config.service.clone(),
        };

        let status = match client.check(request).await {
            Ok(response) => response.into_inner().status(),
            Err(e) => return ProbeResult::down(format!("health check failed: {e}")),
        };
        let ping_ms = start.elapsed().as_millis() as u32;

        let status_text = format!("{status:?}");
        if let Some(keyword) = config.keyword.as_deref().filter(|k| !k.is_empty()) {
            let found = status_text.contains(keyword);
            if found == config.invert {
                return ProbeResult::down(format!(
                    "serving status {status_text:?} failed keyword check {keyword:?}"
                ));
            }
            return ProbeResult::up(format!("serving status {status_text}"), ping_ms);
        }

        match status {
            ServingStatus::Serving => ProbeResult::up("SERVING", ping_ms),
            other => ProbeResult::down(format!("serving status is {other:?}")),
        }
    }
}
