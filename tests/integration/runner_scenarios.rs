//! End-to-end runner scenarios
//!
//! These drive a real runner task against scripted probes under a paused
//! tokio clock, asserting the exact heartbeat sequences the state machine
//! must emit.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use vigilia::model::{MaintenanceStrategy, Monitor, MonitorStatus};
use vigilia::probe::ProbeResult;
use vigilia::repo::{MaintenanceRepository, MonitorRepository};
use vigilia::runner::RunnerHandle;

use crate::helpers::*;

async fn insert(world: &TestWorld, monitor: &Monitor) {
    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("monitor insert");
}

#[tokio::test(start_paused = true)]
async fn test_stable_up_five_ticks() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 3, 0);
    insert(&world, &monitor).await;

    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("200 OK", 120)));
    let handle = RunnerHandle::spawn(monitor.clone(), world.runner_deps(registry_with(probe)));

    // Ticks at 0, 60, 120, 180, 240.
    tokio::time::sleep(Duration::from_secs(241)).await;
    handle.stop().await;

    let beats = beats_of(&world, &monitor.id).await;
    assert_eq!(beats.len(), 5);
    for beat in &beats {
        assert_eq!(beat.status, MonitorStatus::Up);
        assert_eq!(beat.down_count, 0);
        assert_eq!(beat.ping_ms, 120);
        assert!(!beat.important, "stable up beats never notify");
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_absorbed_by_retries() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 3, 0);
    insert(&world, &monitor).await;

    let probe = Arc::new(ScriptedProbe::new(
        vec![ProbeResult::down("connection refused")],
        ProbeResult::up("200 OK", 80),
    ));
    let handle = RunnerHandle::spawn(monitor.clone(), world.runner_deps(registry_with(probe)));

    // First tick fails, retry fires after retry_interval (20s).
    tokio::time::sleep(Duration::from_secs(21)).await;
    handle.stop().await;

    let beats = beats_of(&world, &monitor.id).await;
    assert_eq!(beats.len(), 2);

    assert_eq!(beats[0].status, MonitorStatus::Pending);
    assert_eq!(beats[0].retries, 2);
    assert_eq!(beats[0].down_count, 1);
    assert!(!beats[0].important);

    assert_eq!(beats[1].status, MonitorStatus::Up);
    assert!(beats[1].important, "recovery after failed attempts notifies");
}

#[tokio::test(start_paused = true)]
async fn test_sustained_outage_with_resend() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 2, 3);
    insert(&world, &monitor).await;

    let probe = Arc::new(ScriptedProbe::always(ProbeResult::down("refused")));
    let handle = RunnerHandle::spawn(monitor.clone(), world.runner_deps(registry_with(probe)));

    // Ticks: 0 and 20 in the retry sub-state, then the Down transition at
    // 40 and ordinary interval pacing from there (100, 160, ...).
    tokio::time::sleep(Duration::from_secs(401)).await;
    handle.stop().await;

    let beats = beats_of(&world, &monitor.id).await;
    assert_eq!(beats.len(), 9);

    let statuses: Vec<MonitorStatus> = beats.iter().map(|b| b.status).collect();
    assert_eq!(
        statuses,
        vec![
            MonitorStatus::Pending,
            MonitorStatus::Pending,
            MonitorStatus::Down,
            MonitorStatus::Down,
            MonitorStatus::Down,
            MonitorStatus::Down,
            MonitorStatus::Down,
            MonitorStatus::Down,
            MonitorStatus::Down,
        ]
    );

    let importants: Vec<bool> = beats.iter().map(|b| b.important).collect();
    assert_eq!(
        importants,
        vec![false, false, true, false, false, true, false, false, true],
        "transition beat plus every third consecutive down beat"
    );

    // down_count keeps counting through retries and outage.
    assert_eq!(beats[8].down_count, 9);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_suppresses_probing() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 0, 0);
    insert(&world, &monitor).await;

    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("200 OK", 10)));
    let handle =
        RunnerHandle::spawn(monitor.clone(), world.runner_deps(registry_with(probe.clone())));

    // Two normal ticks.
    tokio::time::sleep(Duration::from_secs(61)).await;

    // Enable a manual window covering the next three ticks.
    let maintenance = vigilia::model::Maintenance::new("deploy", MaintenanceStrategy::Manual);
    let maintenance = MaintenanceRepository::create(world.store.as_ref(), maintenance)
        .await
        .expect("maintenance insert");
    MaintenanceRepository::link_monitor(world.store.as_ref(), &maintenance.id, &monitor.id)
        .await
        .expect("link");

    let probes_before = probe.call_count();
    tokio::time::sleep(Duration::from_secs(180)).await;
    assert_eq!(
        probe.call_count(),
        probes_before,
        "no probe invocations inside the window"
    );

    // Close the window; probing resumes.
    let mut ended = maintenance.clone();
    ended.active = false;
    MaintenanceRepository::update(world.store.as_ref(), &ended)
        .await
        .expect("maintenance update");

    tokio::time::sleep(Duration::from_secs(60)).await;
    handle.stop().await;

    let beats = beats_of(&world, &monitor.id).await;
    assert!(beats.len() >= 6);

    assert_eq!(beats[0].status, MonitorStatus::Up);
    assert_eq!(beats[1].status, MonitorStatus::Up);
    for beat in &beats[2..5] {
        assert_eq!(beat.status, MonitorStatus::Maintenance);
        assert!(!beat.important);
    }
    assert_eq!(beats.last().unwrap().status, MonitorStatus::Up);
}

#[tokio::test(start_paused = true)]
async fn test_no_beats_after_stop() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 0, 0);
    insert(&world, &monitor).await;

    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("200 OK", 5)));
    let handle = RunnerHandle::spawn(monitor.clone(), world.runner_deps(registry_with(probe)));

    tokio::time::sleep(Duration::from_secs(61)).await;
    handle.stop().await;

    let count_at_stop = beats_of(&world, &monitor.id).await.len();
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(
        beats_of(&world, &monitor.id).await.len(),
        count_at_stop,
        "a stopped runner must not emit further beats"
    );
}

#[tokio::test(start_paused = true)]
async fn test_nudge_triggers_immediate_tick() {
    let world = TestWorld::new();
    let monitor = test_monitor(3600, 16, 0, 0);
    insert(&world, &monitor).await;

    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("200 OK", 5)));
    let handle =
        RunnerHandle::spawn(monitor.clone(), world.runner_deps(registry_with(probe.clone())));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(probe.call_count(), 1);

    handle.nudge();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(probe.call_count(), 2, "nudge bypasses the hour-long interval");

    handle.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_end_time_tracks_ping() {
    let world = TestWorld::new();
    let monitor = test_monitor(60, 16, 0, 0);
    insert(&world, &monitor).await;

    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("200 OK", 250)));
    let handle = RunnerHandle::spawn(monitor.clone(), world.runner_deps(registry_with(probe)));

    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.stop().await;

    let beats = beats_of(&world, &monitor.id).await;
    let beat = &beats[0];
    let delta = (beat.end_time - beat.time).num_milliseconds();
    assert_eq!(delta, 250);
    assert!(beat.end_time >= beat.time);
}
