//! Chart bucketing and uptime aggregation

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use vigilia::model::{Granularity, Heartbeat, MonitorStatus};
use vigilia::repo::{HeartbeatRepository, UptimePeriod};

use crate::helpers::*;

/// 90 Up beats spaced 20 seconds apart over 30 minutes bucket into 30
/// minute points of `up = 3`.
#[tokio::test]
async fn test_chart_bucketing_90_beats() {
    let world = TestWorld::new();
    let since = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let until = since + ChronoDuration::minutes(30);

    for i in 0..90 {
        let mut beat = Heartbeat::new(
            "m1",
            MonitorStatus::Up,
            since + ChronoDuration::seconds(i * 20),
        );
        beat.ping_ms = 150;
        world.store.create(beat).await.expect("insert");
    }

    let points = world
        .heartbeats
        .chart_points("m1", since, until, Granularity::Minute)
        .await
        .expect("chart query");

    assert_eq!(points.len(), 30);
    for point in &points {
        assert_eq!(point.up, 3);
        assert_eq!(point.down, 0);
        assert_eq!(point.avg_ping, 150.0);
        assert_eq!(point.min_ping, 150);
        assert_eq!(point.max_ping, 150);
    }
}

#[tokio::test]
async fn test_hour_granularity_rolls_up_minutes() {
    let world = TestWorld::new();
    let since = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let until = since + ChronoDuration::hours(2);

    // One beat per minute in the first hour, none in the second.
    for i in 0..60 {
        let mut beat = Heartbeat::new(
            "m1",
            MonitorStatus::Up,
            since + ChronoDuration::minutes(i),
        );
        beat.ping_ms = 100;
        world.store.create(beat).await.expect("insert");
    }

    let points = world
        .heartbeats
        .chart_points("m1", since, until, Granularity::Hour)
        .await
        .expect("chart query");

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].up, 60);
    assert_eq!(points[0].avg_ping, 100.0);
    assert_eq!(points[1].up, 0);
}

#[tokio::test]
async fn test_uptime_excludes_maintenance_and_is_pure() {
    let world = TestWorld::new();
    let since = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
    let until = since + ChronoDuration::minutes(4);

    // Minute 0: 1 up; minute 1: 1 down; minute 2: maintenance; minute 3: 1 up.
    let specs = [
        (0, MonitorStatus::Up, 200),
        (1, MonitorStatus::Down, 0),
        (2, MonitorStatus::Maintenance, 0),
        (3, MonitorStatus::Up, 100),
    ];
    for (minute, status, ping) in specs {
        let mut beat = Heartbeat::new("m1", status, since + ChronoDuration::minutes(minute));
        beat.ping_ms = ping;
        world.store.create(beat).await.expect("insert");
    }

    let summary = world
        .heartbeats
        .uptime("m1", since, until, Granularity::Minute)
        .await
        .expect("uptime query");

    // 2 up / 3 counted beats; the maintenance bucket is invisible.
    assert!((summary.uptime_percent - 200.0 / 3.0).abs() < 1e-9);
    assert!((summary.avg_ping - 150.0).abs() < 1e-9);

    // Pure function of the stored beats: asking again yields the same.
    let again = world
        .heartbeats
        .uptime("m1", since, until, Granularity::Minute)
        .await
        .expect("uptime query");
    assert_eq!(summary, again);
}

#[tokio::test]
async fn test_uptime_stats_periods() {
    let world = TestWorld::new();
    let now = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();

    // Last hour: 3 up, 1 down. Older than a day: all down (outside 24h).
    for i in 0..4 {
        let status = if i == 0 {
            MonitorStatus::Down
        } else {
            MonitorStatus::Up
        };
        let beat = Heartbeat::new("m1", status, now - ChronoDuration::minutes(i * 10));
        world.store.create(beat).await.expect("insert");
    }
    for i in 0..5 {
        let beat = Heartbeat::new(
            "m1",
            MonitorStatus::Down,
            now - ChronoDuration::days(2) - ChronoDuration::minutes(i),
        );
        world.store.create(beat).await.expect("insert");
    }

    let periods = [
        UptimePeriod::new("24h", ChronoDuration::hours(24)),
        UptimePeriod::new("7d", ChronoDuration::days(7)),
    ];
    let stats = world
        .store
        .find_uptime_stats("m1", &periods, now)
        .await
        .expect("stats query");

    assert_eq!(stats["24h"], 75.0);
    assert!((stats["7d"] - 3.0 / 9.0 * 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_purge_respects_cutoff() {
    let world = TestWorld::new();
    let now = Utc::now();

    world
        .store
        .create(Heartbeat::new(
            "m1",
            MonitorStatus::Up,
            now - ChronoDuration::days(200),
        ))
        .await
        .expect("insert");
    world
        .store
        .create(Heartbeat::new("m1", MonitorStatus::Up, now))
        .await
        .expect("insert");

    let purged = world
        .heartbeats
        .purge_older_than(now - ChronoDuration::days(180))
        .await
        .expect("purge");
    assert_eq!(purged, 1);
    assert_eq!(world.store.find_last_n("m1", 10).await.unwrap().len(), 1);

    // Idempotent.
    let purged = world
        .heartbeats
        .purge_older_than(now - ChronoDuration::days(180))
        .await
        .expect("purge");
    assert_eq!(purged, 0);
}
