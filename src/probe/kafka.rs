//! Kafka producer probe
//!
//! Produces one message to the configured topic; Up iff the broker
//! acknowledges delivery before the deadline. Links against librdkafka, so
//! the whole probe sits behind the non-default `probe-kafka` feature.

use std::time::Instant;

use async_trait::async_trait;
use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Deserialize;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

#[derive(Debug, Deserialize)]
struct KafkaConfig {
    /// Comma-separated bootstrap servers.
    brokers: String,

    topic: String,

    #[serde(default = "default_message")]
    message: String,
}

fn default_message() -> String {
    "vigilia probe".to_string()
}

pub struct KafkaProducerProbe;

#[async_trait]
impl Probe for KafkaProducerProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::KafkaProducer
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: KafkaConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid kafka config: {e}")),
        };

        let producer: FutureProducer = match ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set(
                "message.timeout.ms",
                ctx.deadline.as_millis().to_string(),
            )
            .create()
        {
            Ok(producer) => producer,
            Err(e) => return ProbeResult::down(format!("kafka producer config failed: {e}")),
        };

        let start = Instant::now();
        let record = FutureRecord::<(), _>::to(&config.topic).payload(&config.message);

        match producer.send(record, ctx.deadline).await {
            Ok(_) => ProbeResult::up(
                format!("message delivered to {}", config.topic),
                start.elapsed().as_millis() as u32,
            ),
            Err((e, _)) => ProbeResult::down(format!("kafka delivery failed: {e}")),
        }
    }
}
