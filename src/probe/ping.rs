//! ICMP ping probe
//!
//! Requires raw-socket capability (root, `CAP_NET_RAW`, or the platform's
//! unprivileged ICMP socket support); without it every invocation reports
//! Down with a permission error.

use std::net::IpAddr;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

/// Maximum ICMP payload size (65535 minus IP and ICMP headers).
const MAX_PACKET_SIZE: usize = 65507;

#[derive(Debug, Deserialize)]
struct PingConfig {
    host: String,

    #[serde(default = "default_packet_size")]
    packet_size: usize,
}

fn default_packet_size() -> usize {
    56
}

pub struct PingProbe;

#[async_trait]
impl Probe for PingProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Ping
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: PingConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid ping config: {e}")),
        };

        if config.packet_size > MAX_PACKET_SIZE {
            return ProbeResult::down(format!(
                "packet_size {} exceeds maximum {MAX_PACKET_SIZE}",
                config.packet_size
            ));
        }

        let ip: IpAddr = match config.host.parse() {
            Ok(ip) => ip,
            Err(_) => {
                // Resolve the hostname; any address will do for the echo.
                match tokio::net::lookup_host(format!("{}:0", config.host)).await {
                    Ok(mut addrs) => match addrs.next() {
                        Some(addr) => addr.ip(),
                        None => {
                            return ProbeResult::down(format!(
                                "no address found for {}",
                                config.host
                            ));
                        }
                    },
                    Err(e) => {
                        return ProbeResult::down(format!(
                            "failed to resolve {}: {e}",
                            config.host
                        ));
                    }
                }
            }
        };

        let payload = vec![0u8; config.packet_size];
        let start = Instant::now();

        match surge_ping::ping(ip, &payload).await {
            Ok((_packet, rtt)) => ProbeResult::up(
                format!("reply from {ip} in {} ms", rtt.as_millis()),
                start.elapsed().as_millis() as u32,
            ),
            Err(e) => ProbeResult::down(format!("ping {ip} failed: {e}")),
        }
    }
}
