//! Dispatcher gating and delivery behaviour

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;

use vigilia::Event;
use vigilia::model::{
    ChannelKind, Heartbeat, MaintenanceStrategy, Monitor, MonitorStatus, NotificationChannel,
};
use vigilia::notify::DispatcherHandle;
use vigilia::probe::ProbeResult;
use vigilia::repo::{
    HeartbeatRepository, MaintenanceRepository, MonitorRepository, NotificationChannelRepository,
};
use vigilia::runner::RunnerHandle;

use crate::helpers::*;

/// Monitor + linked webhook channel + dispatcher with a recording sender.
async fn setup(
    world: &TestWorld,
    monitor: &Monitor,
) -> (Arc<RecordingSender>, DispatcherHandle) {
    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("monitor insert");

    let channel = NotificationChannel::new("hook", ChannelKind::Webhook, r#"{"url":"http://x"}"#);
    let channel = NotificationChannelRepository::create(world.store.as_ref(), channel)
        .await
        .expect("channel insert");
    NotificationChannelRepository::link_monitor(world.store.as_ref(), &channel.id, &monitor.id)
        .await
        .expect("link");

    let sender = Arc::new(RecordingSender::new());
    let dispatcher =
        DispatcherHandle::spawn(world.bus.clone(), world.dispatcher_deps(sender_registry_with(sender.clone())));
    (sender, dispatcher)
}

async fn publish_beat(world: &TestWorld, beat: Heartbeat) -> Heartbeat {
    let persisted = HeartbeatRepository::create(world.store.as_ref(), beat)
        .await
        .expect("beat insert");
    world.bus.publish(Event::HeartbeatCreated(persisted.clone()));
    persisted
}

#[tokio::test(start_paused = true)]
async fn test_important_beat_notifies_and_marks_notified() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 0, 0);
    let (sender, dispatcher) = setup(&world, &monitor).await;

    let mut beat = Heartbeat::new(&monitor.id, MonitorStatus::Down, Utc::now());
    beat.msg = "connection refused".to_string();
    beat.important = true;
    let beat = publish_beat(&world, beat).await;

    wait_until(|| sender.sent_count() == 1, Duration::from_secs(10)).await;

    // The notified flag is set after all channel deliveries finished.
    let mut stored = world
        .store
        .find_last_n(&monitor.id, 1)
        .await
        .expect("beat query");
    for _ in 0..100 {
        if stored[0].notified {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        stored = world
            .store
            .find_last_n(&monitor.id, 1)
            .await
            .expect("beat query");
    }
    assert!(stored[0].notified, "dispatcher marks the beat notified");
    assert_eq!(stored[0].id, beat.id);

    let message = sender.sent.lock().unwrap()[0].clone();
    assert!(message.contains("scenario monitor"));
    assert!(message.contains("connection refused"));

    dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_ordinary_beats_do_not_notify() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 0, 0);
    let (sender, dispatcher) = setup(&world, &monitor).await;

    let beat = Heartbeat::new(&monitor.id, MonitorStatus::Up, Utc::now());
    publish_beat(&world, beat).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sender.sent_count(), 0);

    dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_inactive_monitor_is_discarded() {
    let world = TestWorld::new();
    let mut monitor = test_monitor(60, 16, 0, 0);
    monitor.active = false;
    let (sender, dispatcher) = setup(&world, &monitor).await;

    let mut beat = Heartbeat::new(&monitor.id, MonitorStatus::Down, Utc::now());
    beat.important = true;
    publish_beat(&world, beat).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sender.sent_count(), 0);

    dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_suppresses_notifications() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 0, 0);
    let (sender, dispatcher) = setup(&world, &monitor).await;

    let maintenance = vigilia::model::Maintenance::new("window", MaintenanceStrategy::Manual);
    let maintenance = MaintenanceRepository::create(world.store.as_ref(), maintenance)
        .await
        .expect("maintenance insert");
    MaintenanceRepository::link_monitor(world.store.as_ref(), &maintenance.id, &monitor.id)
        .await
        .expect("link");

    let mut beat = Heartbeat::new(&monitor.id, MonitorStatus::Down, Utc::now());
    beat.important = true;
    publish_beat(&world, beat).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sender.sent_count(), 0, "windows suppress even important beats");

    dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_transient_send_failures_are_retried() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 0, 0);

    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("monitor insert");
    let channel = NotificationChannel::new("hook", ChannelKind::Webhook, r#"{"url":"http://x"}"#);
    let channel = NotificationChannelRepository::create(world.store.as_ref(), channel)
        .await
        .expect("channel insert");
    NotificationChannelRepository::link_monitor(world.store.as_ref(), &channel.id, &monitor.id)
        .await
        .expect("link");

    // Two failures, then success on the final retry.
    let sender = Arc::new(RecordingSender::failing_times(2));
    let dispatcher = DispatcherHandle::spawn(
        world.bus.clone(),
        world.dispatcher_deps(sender_registry_with(sender.clone())),
    );

    let mut beat = Heartbeat::new(&monitor.id, MonitorStatus::Down, Utc::now());
    beat.important = true;
    publish_beat(&world, beat).await;

    wait_until(|| sender.sent_count() == 1, Duration::from_secs(30)).await;
    dispatcher.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_do_not_crash_dispatcher() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 0, 0);

    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("monitor insert");
    let channel = NotificationChannel::new("hook", ChannelKind::Webhook, r#"{"url":"http://x"}"#);
    let channel = NotificationChannelRepository::create(world.store.as_ref(), channel)
        .await
        .expect("channel insert");
    NotificationChannelRepository::link_monitor(world.store.as_ref(), &channel.id, &monitor.id)
        .await
        .expect("link");

    let sender = Arc::new(RecordingSender::failing_times(10));
    let dispatcher = DispatcherHandle::spawn(
        world.bus.clone(),
        world.dispatcher_deps(sender_registry_with(sender.clone())),
    );

    let mut beat = Heartbeat::new(&monitor.id, MonitorStatus::Down, Utc::now());
    beat.important = true;
    publish_beat(&world, beat).await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(sender.sent_count(), 0);

    // The dispatcher still processes subsequent beats.
    let mut beat = Heartbeat::new(&monitor.id, MonitorStatus::Up, Utc::now());
    beat.important = true;
    sender.failures_remaining.store(0, std::sync::atomic::Ordering::SeqCst);
    publish_beat(&world, beat).await;

    wait_until(|| sender.sent_count() == 1, Duration::from_secs(30)).await;
    dispatcher.stop().await;
}

/// Full pipeline: runner → bus → dispatcher. A sustained outage with
/// resend_interval 3 produces notifications on beats 3, 6, and 9.
#[tokio::test(start_paused = true)]
async fn test_outage_notification_cadence_end_to_end() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 2, 3);
    let (sender, dispatcher) = setup(&world, &monitor).await;

    let probe = Arc::new(ScriptedProbe::always(ProbeResult::down("refused")));
    let handle = RunnerHandle::spawn(monitor.clone(), world.runner_deps(registry_with(probe)));

    // Nine beats overall (see the runner scenario for the cadence).
    tokio::time::sleep(Duration::from_secs(401)).await;
    handle.stop().await;

    wait_until(|| sender.sent_count() >= 3, Duration::from_secs(60)).await;
    assert_eq!(sender.sent_count(), 3);

    dispatcher.stop().await;
}
