//! DNS probe
//!
//! Resolves a record of the configured type against a specific resolver.
//! The resolver caches answers per TTL internally.

use std::net::IpAddr;
use std::time::Instant;

use async_trait::async_trait;
use hickory_resolver::Resolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use serde::Deserialize;

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult};

#[derive(Debug, Deserialize)]
struct DnsConfig {
    host: String,

    /// Resolver IP address.
    resolver_server: String,

    #[serde(default = "default_port")]
    port: u16,

    #[serde(default = "default_record_type")]
    record_type: String,
}

fn default_port() -> u16 {
    53
}

fn default_record_type() -> String {
    "A".to_string()
}

fn parse_record_type(s: &str) -> Option<RecordType> {
    let record_type = match s.to_uppercase().as_str() {
        "A" => RecordType::A,
        "AAAA" => RecordType::AAAA,
        "CAA" => RecordType::CAA,
        "CNAME" => RecordType::CNAME,
        "MX" => RecordType::MX,
        "NS" => RecordType::NS,
        "PTR" => RecordType::PTR,
        "SOA" => RecordType::SOA,
        "SRV" => RecordType::SRV,
        "TXT" => RecordType::TXT,
        _ => return None,
    };
    Some(record_type)
}

pub struct DnsProbe;

#[async_trait]
impl Probe for DnsProbe {
    fn kind(&self) -> MonitorKind {
        MonitorKind::Dns
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: DnsConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid dns config: {e}")),
        };

        let Some(record_type) = parse_record_type(&config.record_type) else {
            return ProbeResult::down(format!(
                "unsupported dns record type {:?}",
                config.record_type
            ));
        };

        let resolver_ip: IpAddr = match config.resolver_server.parse() {
            Ok(ip) => ip,
            Err(_) => {
                return ProbeResult::down(format!(
                    "resolver_server {:?} is not an ip address",
                    config.resolver_server
                ));
            }
        };

        let nameservers = NameServerConfigGroup::from_ips_clear(&[resolver_ip], config.port, true);
        let resolver_config = ResolverConfig::from_parts(None, vec![], nameservers);
        let resolver =
            Resolver::builder_with_config(resolver_config, TokioConnectionProvider::default())
                .build();

        let start = Instant::now();
        match resolver.lookup(config.host.as_str(), record_type).await {
            Ok(lookup) => {
                let records: Vec<String> = lookup.iter().map(|r| r.to_string()).collect();
                if records.is_empty() {
                    return ProbeResult::down(format!(
                        "no {} records for {}",
                        config.record_type, config.host
                    ));
                }
                ProbeResult::up(
                    format!("{}: {}", config.record_type, records.join("; ")),
                    start.elapsed().as_millis() as u32,
                )
            }
            Err(e) => ProbeResult::down(format!("dns lookup failed: {e}")),
        }
    }
}
