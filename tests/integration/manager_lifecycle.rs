//! Manager lifecycle: one runner per active monitor, event-driven
//! restarts, deletion sweeps, and the push ingress.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use vigilia::Event;
use vigilia::manager::MonitorManager;
use vigilia::model::{MonitorKind, MonitorStatus};
use vigilia::probe::ProbeResult;
use vigilia::repo::{HeartbeatRepository, MaintenanceRepository, MonitorRepository};

use crate::helpers::*;

/// Poll an async condition until it holds or a generous number of virtual
/// seconds has elapsed.
macro_rules! wait_for {
    ($cond:expr) => {{
        let mut tries = 0;
        while !$cond {
            tries += 1;
            assert!(tries < 400, "condition not met: {}", stringify!($cond));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }};
}

fn manager_for(world: &TestWorld, probe: Arc<ScriptedProbe>) -> MonitorManager {
    MonitorManager::new(
        world.store.clone(),
        world.store.clone(),
        world.store.clone(),
        world.store.clone(),
        world.runner_deps(registry_with(probe)),
    )
}

#[tokio::test(start_paused = true)]
async fn test_one_runner_per_active_monitor() {
    let world = TestWorld::new();
    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("ok", 1)));

    let active_a = test_monitor(60, 16, 0, 0);
    let active_b = test_monitor(60, 16, 0, 0);
    let mut inactive = test_monitor(60, 16, 0, 0);
    inactive.active = false;

    for monitor in [&active_a, &active_b, &inactive] {
        MonitorRepository::create(world.store.as_ref(), (*monitor).clone())
            .await
            .expect("insert");
    }

    let manager = manager_for(&world, probe);
    manager.start().await.expect("manager start");

    assert_eq!(manager.runner_count().await, 2);
    assert!(manager.has_runner(&active_a.id).await);
    assert!(manager.has_runner(&active_b.id).await);
    assert!(!manager.has_runner(&inactive.id).await);

    // Idempotent start of an already-running monitor.
    manager.start_monitor(&active_a.id).await.expect("start");
    assert_eq!(manager.runner_count().await, 2);

    manager.shutdown().await;
    assert_eq!(manager.runner_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_active_flip_stops_and_starts_runner() {
    let world = TestWorld::new();
    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("ok", 1)));
    let monitor = test_monitor(60, 16, 0, 0);
    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("insert");

    let manager = manager_for(&world, probe);
    manager.start().await.expect("manager start");
    assert!(manager.has_runner(&monitor.id).await);

    let mut disabled = monitor.clone();
    disabled.active = false;
    MonitorRepository::update(world.store.as_ref(), &disabled)
        .await
        .expect("update");
    world.bus.publish(Event::MonitorUpdated(disabled.clone()));
    wait_for!(!manager.has_runner(&monitor.id).await);

    let mut enabled = disabled.clone();
    enabled.active = true;
    MonitorRepository::update(world.store.as_ref(), &enabled)
        .await
        .expect("update");
    world.bus.publish(Event::MonitorUpdated(enabled));
    wait_for!(manager.has_runner(&monitor.id).await);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_delete_sweeps_heartbeats_and_links() {
    let world = TestWorld::new();
    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("ok", 1)));
    let monitor = test_monitor(60, 16, 0, 0);
    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("insert");

    let mut maintenance =
        vigilia::model::Maintenance::new("m", vigilia::model::MaintenanceStrategy::Manual);
    maintenance.active = false;
    let maintenance = MaintenanceRepository::create(world.store.as_ref(), maintenance)
        .await
        .expect("insert");
    MaintenanceRepository::link_monitor(world.store.as_ref(), &maintenance.id, &monitor.id)
        .await
        .expect("link");

    let manager = manager_for(&world, probe);
    manager.start().await.expect("manager start");

    // Let a couple of beats accumulate.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!beats_of(&world, &monitor.id).await.is_empty());

    MonitorRepository::delete(world.store.as_ref(), &monitor.id)
        .await
        .expect("delete");
    world.bus.publish(Event::MonitorDeleted(monitor.id.clone()));

    wait_for!(
        world
            .store
            .find_last_n(&monitor.id, 10)
            .await
            .unwrap()
            .is_empty()
    );
    wait_for!(
        MaintenanceRepository::find_for_monitor(world.store.as_ref(), &monitor.id)
            .await
            .unwrap()
            .is_empty()
    );

    assert!(!manager.has_runner(&monitor.id).await);
    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_status_transition_is_persisted() {
    let world = TestWorld::new();
    let probe = Arc::new(ScriptedProbe::always(ProbeResult::down("refused")));
    let monitor = test_monitor(60, 16, 0, 0);
    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("insert");

    let manager = manager_for(&world, probe);
    manager.start().await.expect("manager start");

    wait_for!(
        MonitorRepository::find_by_id(world.store.as_ref(), &monitor.id)
            .await
            .unwrap()
            .unwrap()
            .status
            == MonitorStatus::Down
    );

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_submit_push_synthesizes_heartbeats() {
    let world = TestWorld::new();
    let probe = Arc::new(ScriptedProbe::always(ProbeResult::up("unused", 1)));

    let mut monitor = test_monitor(60, 16, 0, 0);
    monitor.kind = MonitorKind::Push;
    monitor.push_token = Some("tok_push".to_string());
    monitor.validate().expect("valid push monitor");
    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("insert");

    let manager = manager_for(&world, probe);
    manager.start().await.expect("manager start");

    let beat = manager
        .submit_push(&monitor.id, MonitorStatus::Up, 33, "alive")
        .await
        .expect("push up");
    assert_eq!(beat.status, MonitorStatus::Up);
    assert_eq!(beat.ping_ms, 33);
    assert!(!beat.important, "first push up is not a recovery");

    let beat = manager
        .submit_push(&monitor.id, MonitorStatus::Down, 0, "job failed")
        .await
        .expect("push down");
    assert!(beat.important, "up -> down push notifies");
    assert_eq!(beat.down_count, 1);

    let beat = manager
        .submit_push(&monitor.id, MonitorStatus::Up, 20, "recovered")
        .await
        .expect("push recovery");
    assert!(beat.important, "down -> up push notifies");

    // Non-push monitors reject the ingress.
    let http_monitor = test_monitor(60, 16, 0, 0);
    MonitorRepository::create(world.store.as_ref(), http_monitor.clone())
        .await
        .expect("insert");
    assert!(
        manager
            .submit_push(&http_monitor.id, MonitorStatus::Up, 1, "x")
            .await
            .is_err()
    );

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_monitor_lookup_by_push_token() {
    let world = TestWorld::new();
    let mut monitor = test_monitor(60, 16, 0, 0);
    monitor.kind = MonitorKind::Push;
    monitor.push_token = Some("tok_xyz".to_string());
    MonitorRepository::create(world.store.as_ref(), monitor.clone())
        .await
        .expect("insert");

    let found = world
        .store
        .find_by_push_token("tok_xyz")
        .await
        .unwrap()
        .expect("token resolves");
    assert_eq!(found.id, monitor.id);
}
