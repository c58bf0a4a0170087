//! TCP connect probe

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::net::TcpStream;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

#[derive(Debug, Deserialize)]
struct TcpConfig {
    host: String,
    port: u16,
}

pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Tcp
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: TcpConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid tcp config: {e}")),
        };

        let addr = format!("{}:{}", config.host, config.port);
        let start = Instant::now();

        match TcpStream::connect(&addr).await {
            Ok(_stream) => ProbeResult::up(
                format!("connected to {addr}"),
                start.elapsed().as_millis() as u32,
            ),
            Err(e) => ProbeResult::down(format!("connect to {addr} failed: {e}")),
        }
    }
}
