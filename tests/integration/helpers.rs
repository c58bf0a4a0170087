//! Helper fixtures for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use vigilia::EventBus;
use vigilia::clock::Clock;
use vigilia::heartbeat::HeartbeatService;
use vigilia::maintenance::MaintenanceService;
use vigilia::model::{ChannelKind, Heartbeat, Monitor, MonitorKind};
use vigilia::notify::{DispatcherDeps, NotifyError, Sender, SenderRegistry};
use vigilia::probe::{Probe, ProbeContext, ProbeRegistry, ProbeResult};
use vigilia::repo::memory::MemoryStore;
use vigilia::runner::RunnerDeps;

/// One in-memory backend plus every service built on top of it.
pub struct TestWorld {
    pub store: Arc<MemoryStore>,
    pub bus: EventBus,
    pub clock: Clock,
    pub heartbeats: HeartbeatService,
    pub maintenance: MaintenanceService,
}

impl TestWorld {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let bus = EventBus::new(64);
        let clock = Clock::new("UTC");
        let heartbeats = HeartbeatService::new(store.clone(), bus.clone());
        let maintenance = MaintenanceService::new(store.clone(), clock);
        Self {
            store,
            bus,
            clock,
            heartbeats,
            maintenance,
        }
    }

    pub fn runner_deps(&self, probes: Arc<ProbeRegistry>) -> RunnerDeps {
        RunnerDeps {
            clock: self.clock,
            probes,
            heartbeats: self.heartbeats.clone(),
            maintenance: self.maintenance.clone(),
            proxies: self.store.clone(),
            bus: self.bus.clone(),
        }
    }

    pub fn dispatcher_deps(&self, senders: Arc<SenderRegistry>) -> DispatcherDeps {
        DispatcherDeps {
            monitors: self.store.clone(),
            heartbeats: self.store.clone(),
            channels: self.store.clone(),
            maintenance: self.maintenance.clone(),
            senders,
            clock: self.clock,
        }
    }
}

/// Monitor preconfigured for scenario tests (http kind, scripted probe).
pub fn test_monitor(
    interval_secs: u64,
    timeout_secs: u64,
    max_retries: u32,
    resend_interval: u32,
) -> Monitor {
    let mut monitor = Monitor::new("scenario monitor", MonitorKind::Http, "{}");
    monitor.interval_secs = interval_secs;
    monitor.timeout_secs = timeout_secs;
    monitor.max_retries = max_retries;
    monitor.retry_interval_secs = 20;
    monitor.resend_interval = resend_interval;
    monitor.validate().expect("test monitor must be valid");
    monitor
}

/// Probe that replays a scripted result sequence, then repeats a default.
pub struct ScriptedProbe {
    kind: MonitorKind,
    script: Mutex<VecDeque<ProbeResult>>,
    fallback: ProbeResult,
    pub calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(script: Vec<ProbeResult>, fallback: ProbeResult) -> Self {
        Self {
            kind: MonitorKind::Http,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(result: ProbeResult) -> Self {
        Self::new(Vec::new(), result)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    fn kind(&self) -> MonitorKind {
        self.kind
    }

    async fn execute(&self, _ctx: ProbeContext<'_>) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

/// Build a registry containing only the given scripted probe.
pub fn registry_with(probe: Arc<ScriptedProbe>) -> Arc<ProbeRegistry> {
    let mut registry = ProbeRegistry::empty();
    registry.register(probe);
    Arc::new(registry)
}

/// Sender that records delivered messages and can fail on demand.
pub struct RecordingSender {
    pub sent: Mutex<Vec<String>>,
    pub failures_remaining: AtomicUsize,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(0),
        }
    }

    pub fn failing_times(failures: usize) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures_remaining: AtomicUsize::new(failures),
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().expect("sent lock").len()
    }
}

#[async_trait]
impl Sender for RecordingSender {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    fn validate(&self, _config: &str) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn send(
        &self,
        _config: &str,
        message: &str,
        _monitor: &Monitor,
        _heartbeat: &Heartbeat,
    ) -> Result<(), NotifyError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(NotifyError::Send("injected failure".to_string()));
        }
        self.sent.lock().expect("sent lock").push(message.to_string());
        Ok(())
    }
}

pub fn sender_registry_with(sender: Arc<RecordingSender>) -> Arc<SenderRegistry> {
    let mut registry = SenderRegistry::empty();
    registry.register(sender);
    Arc::new(registry)
}

/// Poll until `check` passes or `max` virtual time elapses.
pub async fn wait_until<F>(mut check: F, max: Duration)
where
    F: FnMut() -> bool,
{
    let step = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while !check() {
        assert!(waited < max, "condition not met within {max:?}");
        tokio::time::sleep(step).await;
        waited += step;
    }
}

/// All beats of a monitor in chronological order.
pub async fn beats_of(world: &TestWorld, monitor_id: &str) -> Vec<Heartbeat> {
    use vigilia::repo::HeartbeatRepository;
    let mut beats = world
        .store
        .find_last_n(monitor_id, 1000)
        .await
        .expect("beat query");
    beats.reverse();
    beats
}
