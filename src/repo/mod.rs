//! Repository contracts
//!
//! Abstract persistence for monitors, heartbeats, maintenances,
//! notification channels, proxies, and their relationships. Two backings
//! exist: an in-memory store (always available, used by tests and as the
//! no-persistence default) and SQLite via sqlx behind the `storage-sqlite`
//! feature. Backend selection happens at construction; everything above the
//! trait boundary only ever sees opaque string ids.
//!
//! ## Thread Safety
//!
//! Implementations must be `Send + Sync`; handles are shared as `Arc`s
//! across runner tasks.

pub mod error;
pub mod memory;

#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::model::{
    ChartPoint, Heartbeat, Maintenance, Monitor, MonitorStatus, NotificationChannel, Proxy,
};
pub use error::{RepoError, RepoResult};

/// Pagination and filtering for list queries.
#[derive(Debug, Clone)]
pub struct ListQuery {
    /// 1-based page index.
    pub page: u64,
    pub limit: u64,
    pub active: Option<bool>,
    pub search: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 50,
            active: None,
            search: None,
        }
    }
}

impl ListQuery {
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1) * self.limit
    }
}

/// One labelled look-back window for uptime statistics.
#[derive(Debug, Clone)]
pub struct UptimePeriod {
    pub label: String,
    pub window: Duration,
}

impl UptimePeriod {
    pub fn new(label: impl Into<String>, window: Duration) -> Self {
        Self {
            label: label.into(),
            window,
        }
    }
}

#[async_trait]
pub trait MonitorRepository: Send + Sync {
    async fn create(&self, monitor: Monitor) -> RepoResult<Monitor>;
    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Monitor>>;
    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<Monitor>>;
    async fn find_active(&self) -> RepoResult<Vec<Monitor>>;
    async fn find_by_push_token(&self, token: &str) -> RepoResult<Option<Monitor>>;
    async fn update(&self, monitor: &Monitor) -> RepoResult<()>;

    /// Persist only the latest status, leaving the definition untouched.
    async fn update_status(&self, id: &str, status: MonitorStatus) -> RepoResult<()>;

    async fn delete(&self, id: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait HeartbeatRepository: Send + Sync {
    async fn create(&self, heartbeat: Heartbeat) -> RepoResult<Heartbeat>;

    /// Newest first.
    async fn find_last_n(&self, monitor_id: &str, n: usize) -> RepoResult<Vec<Heartbeat>>;

    /// Newest first, 1-based page.
    async fn find_by_monitor_paginated(
        &self,
        monitor_id: &str,
        page: u64,
        limit: u64,
    ) -> RepoResult<Vec<Heartbeat>>;

    /// Minute-bucketed chart points over `[since, until)`, gaps filled with
    /// zero points.
    async fn find_range_chart_points(
        &self,
        monitor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepoResult<Vec<ChartPoint>>;

    /// Uptime percent per labelled look-back window ending at `now`.
    async fn find_uptime_stats(
        &self,
        monitor_id: &str,
        periods: &[UptimePeriod],
        now: DateTime<Utc>,
    ) -> RepoResult<HashMap<String, f64>>;

    async fn set_notified(&self, id: &str) -> RepoResult<()>;

    /// Returns the number of deleted beats. Idempotent.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> RepoResult<u64>;

    async fn delete_by_monitor(&self, monitor_id: &str) -> RepoResult<u64>;
}

#[async_trait]
pub trait MaintenanceRepository: Send + Sync {
    async fn create(&self, maintenance: Maintenance) -> RepoResult<Maintenance>;
    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Maintenance>>;
    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<Maintenance>>;
    async fn update(&self, maintenance: &Maintenance) -> RepoResult<()>;
    async fn delete(&self, id: &str) -> RepoResult<()>;

    /// All maintenances linked to the monitor through `monitor_maintenance`.
    async fn find_for_monitor(&self, monitor_id: &str) -> RepoResult<Vec<Maintenance>>;

    async fn link_monitor(&self, maintenance_id: &str, monitor_id: &str) -> RepoResult<()>;
    async fn unlink_monitor(&self, maintenance_id: &str, monitor_id: &str) -> RepoResult<()>;
    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait NotificationChannelRepository: Send + Sync {
    async fn create(&self, channel: NotificationChannel) -> RepoResult<NotificationChannel>;
    async fn find_by_id(&self, id: &str) -> RepoResult<Option<NotificationChannel>>;
    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<NotificationChannel>>;
    async fn update(&self, channel: &NotificationChannel) -> RepoResult<()>;
    async fn delete(&self, id: &str) -> RepoResult<()>;

    /// All channels linked to the monitor through `monitor_notification`.
    async fn find_for_monitor(&self, monitor_id: &str) -> RepoResult<Vec<NotificationChannel>>;

    async fn link_monitor(&self, channel_id: &str, monitor_id: &str) -> RepoResult<()>;
    async fn unlink_monitor(&self, channel_id: &str, monitor_id: &str) -> RepoResult<()>;
    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait ProxyRepository: Send + Sync {
    async fn create(&self, proxy: Proxy) -> RepoResult<Proxy>;
    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Proxy>>;
    async fn delete(&self, id: &str) -> RepoResult<()>;
}

/// Relationship table between monitors and status pages. The status page
/// entity itself is rendered outside the core; only the unique link pairs
/// are persisted here.
#[async_trait]
pub trait StatusPageRepository: Send + Sync {
    async fn link_monitor(&self, status_page_id: &str, monitor_id: &str) -> RepoResult<()>;
    async fn unlink_monitor(&self, status_page_id: &str, monitor_id: &str) -> RepoResult<()>;
    async fn monitors_for_page(&self, status_page_id: &str) -> RepoResult<Vec<String>>;
    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()>;
}

const MINUTE_MS: i64 = 60_000;

/// Aggregate raw beats into minute buckets over `[since, until)`, filling
/// gaps with zero points. Shared by both backends so their chart semantics
/// cannot drift apart.
///
/// Pending beats count towards `down` (they are failed attempts);
/// Maintenance beats only increment the `maintenance` counter. Ping
/// statistics are computed over Up beats.
pub(crate) fn chart_points_from_beats(
    beats: &[Heartbeat],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Vec<ChartPoint> {
    struct Acc {
        up: u32,
        down: u32,
        maintenance: u32,
        ping_sum: u64,
        min_ping: u32,
        max_ping: u32,
    }

    let mut buckets: HashMap<i64, Acc> = HashMap::new();

    for beat in beats {
        if beat.time < since || beat.time >= until {
            continue;
        }
        let bucket = beat.time.timestamp_millis().div_euclid(MINUTE_MS) * MINUTE_MS;
        let acc = buckets.entry(bucket).or_insert(Acc {
            up: 0,
            down: 0,
            maintenance: 0,
            ping_sum: 0,
            min_ping: u32::MAX,
            max_ping: 0,
        });
        match beat.status {
            MonitorStatus::Up => {
                acc.up += 1;
                acc.ping_sum += beat.ping_ms as u64;
                acc.min_ping = acc.min_ping.min(beat.ping_ms);
                acc.max_ping = acc.max_ping.max(beat.ping_ms);
            }
            MonitorStatus::Down | MonitorStatus::Pending => acc.down += 1,
            MonitorStatus::Maintenance => acc.maintenance += 1,
        }
    }

    let first = since.timestamp_millis().div_euclid(MINUTE_MS) * MINUTE_MS;
    let mut points = Vec::new();
    let mut bucket = first;
    while bucket < until.timestamp_millis() {
        let point = match buckets.remove(&bucket) {
            Some(acc) => ChartPoint {
                timestamp_ms: bucket,
                up: acc.up,
                down: acc.down,
                avg_ping: if acc.up > 0 {
                    acc.ping_sum as f64 / acc.up as f64
                } else {
                    0.0
                },
                min_ping: if acc.up > 0 { acc.min_ping } else { 0 },
                max_ping: acc.max_ping,
                maintenance: acc.maintenance,
            },
            None => ChartPoint::empty(bucket),
        };
        points.push(point);
        bucket += MINUTE_MS;
    }
    points
}

/// Uptime percent over a slice of beats: `up / (up + down) × 100`,
/// maintenance beats excluded entirely. An empty window reports 100%.
pub(crate) fn uptime_percent_from_beats(beats: &[Heartbeat]) -> f64 {
    let mut up = 0u64;
    let mut down = 0u64;
    for beat in beats {
        match beat.status {
            MonitorStatus::Up => up += 1,
            MonitorStatus::Down | MonitorStatus::Pending => down += 1,
            MonitorStatus::Maintenance => {}
        }
    }
    if up + down == 0 {
        100.0
    } else {
        up as f64 / (up + down) as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn beat_at(minute: u32, second: u32, status: MonitorStatus, ping: u32) -> Heartbeat {
        let time = Utc
            .with_ymd_and_hms(2024, 3, 1, 10, minute, second)
            .unwrap();
        let mut hb = Heartbeat::new("m1", status, time);
        hb.ping_ms = ping;
        hb
    }

    #[test]
    fn test_chart_points_bucket_and_fill_gaps() {
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap();

        let beats = vec![
            beat_at(0, 10, MonitorStatus::Up, 100),
            beat_at(0, 30, MonitorStatus::Up, 200),
            beat_at(2, 0, MonitorStatus::Down, 0),
            beat_at(4, 59, MonitorStatus::Maintenance, 0),
        ];

        let points = chart_points_from_beats(&beats, since, until);
        assert_eq!(points.len(), 5);

        assert_eq!(points[0].up, 2);
        assert_eq!(points[0].avg_ping, 150.0);
        assert_eq!(points[0].min_ping, 100);
        assert_eq!(points[0].max_ping, 200);

        // Gap minute stays zeroed.
        assert_eq!(points[1], ChartPoint::empty(points[1].timestamp_ms));

        assert_eq!(points[2].down, 1);
        assert_eq!(points[4].maintenance, 1);
    }

    #[test]
    fn test_chart_points_exclude_out_of_range() {
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 10, 1, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 3, 1, 10, 2, 0).unwrap();

        let beats = vec![
            beat_at(0, 59, MonitorStatus::Up, 10),
            beat_at(1, 0, MonitorStatus::Up, 10),
            beat_at(2, 0, MonitorStatus::Up, 10),
        ];

        let points = chart_points_from_beats(&beats, since, until);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].up, 1);
    }

    #[test]
    fn test_uptime_percent_excludes_maintenance() {
        let beats = vec![
            beat_at(0, 0, MonitorStatus::Up, 10),
            beat_at(1, 0, MonitorStatus::Up, 10),
            beat_at(2, 0, MonitorStatus::Down, 0),
            beat_at(3, 0, MonitorStatus::Maintenance, 0),
        ];
        let percent = uptime_percent_from_beats(&beats);
        assert!((percent - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_uptime_percent_empty_window() {
        assert_eq!(uptime_percent_from_beats(&[]), 100.0);
    }
}
