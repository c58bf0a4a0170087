//! Heartbeat pipeline
//!
//! Persists beats, publishes `HeartbeatCreated`, and computes the chart and
//! uptime aggregates consumed by dashboards and status pages. A failed
//! write is retried once synchronously and then dropped; a monitor that
//! keeps ticking with an observability gap beats a stuck runner.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::bus::EventBus;
use crate::events::Event;
use crate::model::{ChartPoint, Granularity, Heartbeat};
use crate::repo::{HeartbeatRepository, RepoResult};

/// Aggregated uptime over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UptimeSummary {
    pub uptime_percent: f64,

    /// Up-weighted mean latency over the window, in milliseconds.
    pub avg_ping: f64,
}

#[derive(Clone)]
pub struct HeartbeatService {
    repo: Arc<dyn HeartbeatRepository>,
    bus: EventBus,
}

impl HeartbeatService {
    pub fn new(repo: Arc<dyn HeartbeatRepository>, bus: EventBus) -> Self {
        Self { repo, bus }
    }

    pub fn repo(&self) -> &Arc<dyn HeartbeatRepository> {
        &self.repo
    }

    /// Persist a beat and publish `HeartbeatCreated`.
    ///
    /// Returns the persisted beat, or `None` when both the write and its
    /// single retry failed (the beat is dropped, the caller continues).
    pub async fn record(&self, heartbeat: Heartbeat) -> Option<Heartbeat> {
        let persisted = match self.repo.create(heartbeat.clone()).await {
            Ok(persisted) => persisted,
            Err(first) => {
                warn!(
                    monitor = %heartbeat.monitor_id,
                    "heartbeat write failed, retrying once: {first}"
                );
                match self.repo.create(heartbeat.clone()).await {
                    Ok(persisted) => persisted,
                    Err(second) => {
                        error!(
                            monitor = %heartbeat.monitor_id,
                            "dropping heartbeat after retry: {second}"
                        );
                        return None;
                    }
                }
            }
        };

        self.bus.publish(Event::HeartbeatCreated(persisted.clone()));
        Some(persisted)
    }

    /// Chart buckets over `[since, until)`. Minute granularity comes from
    /// the repository directly; hour and day aggregate minute buckets in
    /// memory.
    pub async fn chart_points(
        &self,
        monitor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        granularity: Granularity,
    ) -> RepoResult<Vec<ChartPoint>> {
        let minutes = self
            .repo
            .find_range_chart_points(monitor_id, since, until)
            .await?;
        if granularity == Granularity::Minute {
            return Ok(minutes);
        }
        Ok(aggregate_points(&minutes, granularity))
    }

    /// Uptime over `[since, until)`: `sum(up) / sum(up + down) × 100`, with
    /// avg ping the up-weighted mean. Buckets touched by maintenance are
    /// excluded from both.
    pub async fn uptime(
        &self,
        monitor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        granularity: Granularity,
    ) -> RepoResult<UptimeSummary> {
        let points = self
            .chart_points(monitor_id, since, until, granularity)
            .await?;
        Ok(summarize(&points))
    }

    /// Remove beats older than `cutoff`; safe to run on any schedule.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        self.repo.delete_older_than(cutoff).await
    }
}

/// Roll minute buckets up into the coarser granularity.
fn aggregate_points(minutes: &[ChartPoint], granularity: Granularity) -> Vec<ChartPoint> {
    let width = granularity.millis();
    let mut points: Vec<ChartPoint> = Vec::new();

    for minute in minutes {
        let bucket = minute.timestamp_ms.div_euclid(width) * width;
        if points.last().map(|p| p.timestamp_ms) != Some(bucket) {
            points.push(ChartPoint::empty(bucket));
        }
        let acc = points.last_mut().expect("bucket just pushed");

        // avg_ping stays an up-weighted mean across merged buckets.
        let merged_up = acc.up + minute.up;
        if merged_up > 0 {
            acc.avg_ping = (acc.avg_ping * acc.up as f64 + minute.avg_ping * minute.up as f64)
                / merged_up as f64;
        }
        if minute.up > 0 {
            acc.min_ping = if acc.up == 0 {
                minute.min_ping
            } else {
                acc.min_ping.min(minute.min_ping)
            };
            acc.max_ping = acc.max_ping.max(minute.max_ping);
        }
        acc.up = merged_up;
        acc.down += minute.down;
        acc.maintenance += minute.maintenance;
    }

    points
}

fn summarize(points: &[ChartPoint]) -> UptimeSummary {
    let mut up = 0u64;
    let mut down = 0u64;
    let mut ping_weighted = 0.0f64;

    for point in points {
        if point.maintenance > 0 {
            continue;
        }
        up += point.up as u64;
        down += point.down as u64;
        ping_weighted += point.avg_ping * point.up as f64;
    }

    let uptime_percent = if up + down == 0 {
        100.0
    } else {
        up as f64 / (up + down) as f64 * 100.0
    };
    let avg_ping = if up > 0 { ping_weighted / up as f64 } else { 0.0 };

    UptimeSummary {
        uptime_percent,
        avg_ping,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus;
    use crate::model::MonitorStatus;
    use crate::repo::memory::MemoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn point(ts_min: i64, up: u32, down: u32, avg: f64, maintenance: u32) -> ChartPoint {
        ChartPoint {
            timestamp_ms: ts_min * 60_000,
            up,
            down,
            avg_ping: avg,
            min_ping: if up > 0 { avg as u32 } else { 0 },
            max_ping: if up > 0 { avg as u32 } else { 0 },
            maintenance,
        }
    }

    #[test]
    fn test_aggregate_minutes_into_hours() {
        // Two minutes in hour 0, one in hour 1.
        let minutes = vec![
            point(0, 2, 0, 100.0, 0),
            point(30, 1, 1, 40.0, 0),
            point(60, 1, 0, 10.0, 0),
        ];
        let hours = aggregate_points(&minutes, Granularity::Hour);
        assert_eq!(hours.len(), 2);

        assert_eq!(hours[0].up, 3);
        assert_eq!(hours[0].down, 1);
        // (100 × 2 + 40 × 1) / 3
        assert!((hours[0].avg_ping - 80.0).abs() < 1e-9);

        assert_eq!(hours[1].up, 1);
        assert_eq!(hours[1].avg_ping, 10.0);
    }

    #[test]
    fn test_summarize_excludes_maintenance_buckets() {
        let points = vec![
            point(0, 3, 1, 100.0, 0),
            point(1, 0, 4, 0.0, 1), // excluded entirely
        ];
        let summary = summarize(&points);
        assert_eq!(summary.uptime_percent, 75.0);
        assert_eq!(summary.avg_ping, 100.0);
    }

    #[test]
    fn test_summarize_empty_is_full_uptime() {
        let summary = summarize(&[]);
        assert_eq!(summary.uptime_percent, 100.0);
        assert_eq!(summary.avg_ping, 0.0);
    }

    #[tokio::test]
    async fn test_record_publishes_event() {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new(16);
        let mut rx = events.subscribe();
        let service = HeartbeatService::new(store, events);

        let hb = Heartbeat::new("m1", MonitorStatus::Up, Utc::now());
        let persisted = service.record(hb).await.unwrap();

        match bus::next_event("test", &mut rx).await.unwrap() {
            Event::HeartbeatCreated(event_hb) => assert_eq!(event_hb.id, persisted.id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    /// Repository stub whose first `create` fails.
    struct FlakyRepo {
        inner: MemoryStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl HeartbeatRepository for FlakyRepo {
        async fn create(&self, heartbeat: Heartbeat) -> crate::repo::RepoResult<Heartbeat> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(crate::repo::RepoError::QueryFailed("injected".to_string()));
            }
            HeartbeatRepository::create(&self.inner, heartbeat).await
        }

        async fn find_last_n(
            &self,
            monitor_id: &str,
            n: usize,
        ) -> crate::repo::RepoResult<Vec<Heartbeat>> {
            self.inner.find_last_n(monitor_id, n).await
        }

        async fn find_by_monitor_paginated(
            &self,
            monitor_id: &str,
            page: u64,
            limit: u64,
        ) -> crate::repo::RepoResult<Vec<Heartbeat>> {
            self.inner
                .find_by_monitor_paginated(monitor_id, page, limit)
                .await
        }

        async fn find_range_chart_points(
            &self,
            monitor_id: &str,
            since: DateTime<Utc>,
            until: DateTime<Utc>,
        ) -> crate::repo::RepoResult<Vec<ChartPoint>> {
            self.inner
                .find_range_chart_points(monitor_id, since, until)
                .await
        }

        async fn find_uptime_stats(
            &self,
            monitor_id: &str,
            periods: &[crate::repo::UptimePeriod],
            now: DateTime<Utc>,
        ) -> crate::repo::RepoResult<std::collections::HashMap<String, f64>> {
            self.inner.find_uptime_stats(monitor_id, periods, now).await
        }

        async fn set_notified(&self, id: &str) -> crate::repo::RepoResult<()> {
            self.inner.set_notified(id).await
        }

        async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> crate::repo::RepoResult<u64> {
            self.inner.delete_older_than(cutoff).await
        }

        async fn delete_by_monitor(&self, monitor_id: &str) -> crate::repo::RepoResult<u64> {
            self.inner.delete_by_monitor(monitor_id).await
        }
    }

    #[tokio::test]
    async fn test_record_retries_once_then_succeeds() {
        let repo = Arc::new(FlakyRepo {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(1),
        });
        let service = HeartbeatService::new(repo.clone(), EventBus::new(16));

        let hb = Heartbeat::new("m1", MonitorStatus::Up, Utc::now());
        assert!(service.record(hb).await.is_some());
        assert_eq!(repo.inner.find_last_n("m1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_drops_after_second_failure() {
        let repo = Arc::new(FlakyRepo {
            inner: MemoryStore::new(),
            failures: AtomicUsize::new(2),
        });
        let service = HeartbeatService::new(repo.clone(), EventBus::new(16));

        let hb = Heartbeat::new("m1", MonitorStatus::Up, Utc::now());
        assert!(service.record(hb).await.is_none());
        assert!(repo.inner.find_last_n("m1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chart_points_minute_passthrough() {
        let store = Arc::new(MemoryStore::new());
        let service = HeartbeatService::new(store.clone(), EventBus::new(16));

        let since = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        let until = Utc.with_ymd_and_hms(2024, 3, 1, 10, 3, 0).unwrap();
        let mut hb = Heartbeat::new("m1", MonitorStatus::Up, since);
        hb.ping_ms = 42;
        HeartbeatRepository::create(store.as_ref(), hb).await.unwrap();

        let points = service
            .chart_points("m1", since, until, Granularity::Minute)
            .await
            .unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].up, 1);
        assert_eq!(points[0].avg_ping, 42.0);
    }
}
