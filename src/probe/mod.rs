//! Probe registry and executors
//!
//! Every monitor kind maps to one executor implementing [`Probe`]. An
//! executor parses its own config JSON defensively (malformed config is a
//! Down result with an explanatory message, never a panic), measures
//! latency itself, and must stay within the deadline the registry enforces
//! around every invocation.
//!
//! ## Result semantics
//!
//! Up on success, Down on failure, Pending when explicitly indeterminate.
//! Deadline expiry yields Down with the message "timeout".

pub mod http;
pub mod rabbitmq;
pub mod tcp;

#[cfg(feature = "probe-dns")]
pub mod dns;

#[cfg(feature = "probe-docker")]
pub mod docker;

#[cfg(feature = "probe-grpc")]
pub mod grpc;

#[cfg(feature = "probe-kafka")]
pub mod kafka;

#[cfg(feature = "probe-mongo")]
pub mod mongo;

#[cfg(feature = "probe-mqtt")]
pub mod mqtt;

#[cfg(feature = "probe-ping")]
pub mod ping;

#[cfg(feature = "probe-redis")]
pub mod redis;

#[cfg(feature = "probe-snmp")]
pub mod snmp;

#[cfg(feature = "probe-sql")]
pub mod sql;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::model::{Monitor, MonitorKind, Proxy};

/// Outcome status of one probe invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Up,
    Down,
    Pending,
}

/// Outcome of one probe invocation.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    pub message: String,
    pub ping_ms: u32,
}

impl ProbeResult {
    pub fn up(message: impl Into<String>, ping_ms: u32) -> Self {
        Self {
            status: ProbeStatus::Up,
            message: message.into(),
            ping_ms,
        }
    }

    pub fn down(message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Down,
            message: message.into(),
            ping_ms: 0,
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Pending,
            message: message.into(),
            ping_ms: 0,
        }
    }
}

/// Everything an executor may consult for one invocation.
pub struct ProbeContext<'a> {
    pub monitor: &'a Monitor,
    pub proxy: Option<&'a Proxy>,

    /// Cancelled when the runner is being stopped; long polls should check
    /// it between protocol steps.
    pub token: CancellationToken,

    /// The monitor timeout. The registry enforces it around the whole
    /// invocation; executors use it for per-step client deadlines.
    pub deadline: Duration,
}

/// One probe executor.
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> MonitorKind;

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult;
}

/// Maps monitor kinds to executors.
pub struct ProbeRegistry {
    probes: HashMap<MonitorKind, Arc<dyn Probe>>,
}

impl Default for ProbeRegistry {
    fn default() -> Self {
        let mut registry = Self {
            probes: HashMap::new(),
        };
        registry.register(Arc::new(http::HttpProbe::new()));
        registry.register(Arc::new(tcp::TcpProbe));
        registry.register(Arc::new(rabbitmq::RabbitmqProbe::new()));

        #[cfg(feature = "probe-dns")]
        registry.register(Arc::new(dns::DnsProbe));

        #[cfg(feature = "probe-ping")]
        registry.register(Arc::new(ping::PingProbe));

        #[cfg(feature = "probe-mqtt")]
        registry.register(Arc::new(mqtt::MqttProbe));

        #[cfg(feature = "probe-redis")]
        registry.register(Arc::new(redis::RedisProbe));

        #[cfg(feature = "probe-sql")]
        {
            registry.register(Arc::new(sql::SqlProbe::postgres()));
            registry.register(Arc::new(sql::SqlProbe::mysql()));
            registry.register(Arc::new(sql::SqlProbe::mariadb()));
        }

        #[cfg(feature = "probe-mongo")]
        registry.register(Arc::new(mongo::MongoProbe));

        #[cfg(feature = "probe-grpc")]
        registry.register(Arc::new(grpc::GrpcProbe));

        #[cfg(feature = "probe-docker")]
        registry.register(Arc::new(docker::DockerProbe));

        #[cfg(feature = "probe-snmp")]
        registry.register(Arc::new(snmp::SnmpProbe));

        #[cfg(feature = "probe-kafka")]
        registry.register(Arc::new(kafka::KafkaProducerProbe));

        registry
    }
}

impl ProbeRegistry {
    pub fn empty() -> Self {
        Self {
            probes: HashMap::new(),
        }
    }

    /// Register (or replace) the executor for its kind.
    pub fn register(&mut self, probe: Arc<dyn Probe>) {
        self.probes.insert(probe.kind(), probe);
    }

    pub fn supports(&self, kind: MonitorKind) -> bool {
        self.probes.contains_key(&kind)
    }

    /// Run the executor for the monitor's kind under the monitor timeout.
    pub async fn execute(
        &self,
        monitor: &Monitor,
        proxy: Option<&Proxy>,
        token: CancellationToken,
    ) -> ProbeResult {
        let Some(probe) = self.probes.get(&monitor.kind) else {
            return ProbeResult::down(format!(
                "no probe executor registered for kind {}",
                monitor.kind
            ));
        };

        let deadline = monitor.timeout();
        let ctx = ProbeContext {
            monitor,
            proxy,
            token,
            deadline,
        };

        debug!(monitor = %monitor.name, kind = %monitor.kind, "executing probe");
        match tokio::time::timeout(deadline, probe.execute(ctx)).await {
            Ok(result) => result,
            Err(_) => ProbeResult::down("timeout"),
        }
    }
}

/// Navigate a dot-separated path into a JSON value. Numeric segments index
/// arrays.
pub(crate) fn lookup_json_path<'a>(
    value: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON value the way assertion configs expect to compare it.
pub(crate) fn json_value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Apply an optional `json_path` / `expected_value` assertion to a probe
/// payload.
pub(crate) fn assert_json_payload(
    payload: &serde_json::Value,
    json_path: Option<&str>,
    expected_value: Option<&str>,
) -> Result<String, String> {
    let Some(path) = json_path.filter(|p| !p.is_empty()) else {
        return Ok(String::new());
    };
    let Some(found) = lookup_json_path(payload, path) else {
        return Err(format!("json path {path:?} not found in response"));
    };
    let text = json_value_text(found);
    if let Some(expected) = expected_value {
        if text != expected {
            return Err(format!(
                "json path {path:?} evaluated to {text:?}, expected {expected:?}"
            ));
        }
    }
    Ok(text)
}
