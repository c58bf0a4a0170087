//! SNMP probe
//!
//! Issues a GET for one OID (sysUpTime by default) and optionally compares
//! the returned value. The session API is synchronous, so the exchange runs
//! on the blocking pool.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

/// sysUpTime.0
const DEFAULT_OID: &str = "1.3.6.1.2.1.1.3.0";

#[derive(Debug, Clone, Deserialize)]
struct SnmpConfig {
    host: String,

    #[serde(default = "default_port")]
    port: u16,

    #[serde(default = "default_community")]
    community: String,

    #[serde(default = "default_oid")]
    oid: String,

    /// "1" or "2c"; v3 credentials are not covered by this probe.
    #[serde(default = "default_version")]
    version: String,

    #[serde(default)]
    expected_value: Option<String>,
}

fn default_port() -> u16 {
    161
}

fn default_community() -> String {
    "public".to_string()
}

fn default_oid() -> String {
    DEFAULT_OID.to_string()
}

fn default_version() -> String {
    "2c".to_string()
}

fn parse_oid(oid: &str) -> Result<Vec<u64>, String> {
    let parts: Result<Vec<u64>, _> = oid
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::parse::<u64>)
        .collect();
    match parts {
        Ok(parts) if !parts.is_empty() => Ok(parts),
        _ => Err(format!("invalid oid {oid:?}")),
    }
}

pub struct SnmpProbe;

#[async_trait]
impl Probe for SnmpProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Snmp
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: SnmpConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid snmp config: {e}")),
        };

        let oid_parts = match parse_oid(&config.oid) {
            Ok(parts) => parts,
            Err(msg) => return ProbeResult::down(msg),
        };

        let addr = format!("{}:{}", config.host, config.port);
        let expected_value = config.expected_value.clone();
        let deadline = ctx.deadline;
        let start = Instant::now();

        let outcome = tokio::task::spawn_blocking(move || -> Result<String, String> {
            let oid = snmp2::Oid::from(oid_parts.as_slice())
                .map_err(|_| format!("invalid oid {:?}", config.oid))?;

            let mut session = match config.version.as_str() {
                "1" => snmp2::SyncSession::new_v1(&addr, config.community.as_bytes(), Some(deadline), 0),
                "2c" | "2" => {
                    snmp2::SyncSession::new_v2c(&addr, config.community.as_bytes(), Some(deadline), 0)
                }
                other => return Err(format!("unsupported snmp version {other:?}")),
            }
            .map_err(|e| format!("snmp session failed: {e:?}"))?;

            let mut response = session
                .get(&oid)
                .map_err(|e| format!("snmp get failed: {e:?}"))?;

            match response.varbinds.next() {
                Some((_oid, value)) => Ok(format!("{value:?}")),
                None => Err("snmp response carried no varbinds".to_string()),
            }
        })
        .await;

        let ping_ms = start.elapsed().as_millis() as u32;
        match outcome {
            Ok(Ok(value)) => {
                if let Some(expected) = expected_value.as_deref() {
                    if !value.contains(expected) {
                        return ProbeResult::down(format!(
                            "snmp value {value} does not contain expected {expected:?}"
                        ));
                    }
                }
                ProbeResult::up(format!("snmp value {value}"), ping_ms)
            }
            Ok(Err(msg)) => ProbeResult::down(msg),
            Err(e) => ProbeResult::down(format!("snmp task failed: {e}")),
        }
    }
}
