//! Monitor runner
//!
//! One cooperative task per active monitor. Each tick the runner asks the
//! maintenance evaluator whether to skip the probe, otherwise executes the
//! probe under the monitor timeout and feeds the result through the status
//! state machine:
//!
//! ```text
//!          Up ──failure──▶ retry sub-state (Pending beats, retry_interval)
//!          ▲                     │ max_retries exhausted
//!          │ success             ▼
//!       Pending ◀─start      Down ──resend_interval──▶ important Down beats
//!          │                     ▲
//!          └──── Maintenance ────┘   (window active: probe skipped)
//! ```
//!
//! The runner owns its cancellation token; the manager cancels it and the
//! task exits within twice the monitor timeout. A nudge wakes the task for
//! an immediate tick (config changes, push events, maintenance
//! boundaries).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::events::Event;
use crate::heartbeat::HeartbeatService;
use crate::maintenance::MaintenanceService;
use crate::model::{Heartbeat, Monitor, MonitorKind, MonitorStatus};
use crate::probe::{ProbeRegistry, ProbeResult, ProbeStatus};
use crate::repo::{HeartbeatRepository, ProxyRepository};

/// Shared services handed to every runner.
#[derive(Clone)]
pub struct RunnerDeps {
    pub clock: Clock,
    pub probes: Arc<ProbeRegistry>,
    pub heartbeats: HeartbeatService,
    pub maintenance: MaintenanceService,
    pub proxies: Arc<dyn ProxyRepository>,
    pub bus: EventBus,
}

/// Pace of the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickPace {
    Normal,
    Retry,
}

/// Mutable state the state machine threads from tick to tick.
#[derive(Debug, Clone)]
struct RunState {
    status: MonitorStatus,

    /// Consecutive failed attempts, retries included.
    down_count: u32,

    /// Down beats since the last important beat, for resend gating.
    beats_since_notified: u32,

    last_beat_time: Option<DateTime<Utc>>,
}

impl RunState {
    fn initial() -> Self {
        Self {
            status: MonitorStatus::Pending,
            down_count: 0,
            beats_since_notified: 0,
            last_beat_time: None,
        }
    }
}

/// Everything one tick decided about the beat to emit.
#[derive(Debug)]
struct BeatPlan {
    beat_status: MonitorStatus,
    message: String,
    ping_ms: u32,
    retries_left: u32,
    down_count: u32,
    beats_since_notified: u32,
    important: bool,
    transition_to: Option<MonitorStatus>,
    pace: TickPace,
}

/// The status state machine, pure so it can be tested exhaustively.
fn decide(state: &RunState, monitor: &Monitor, result: &ProbeResult) -> BeatPlan {
    match result.status {
        ProbeStatus::Up => {
            // Recovery is only notifiable when failed attempts precede it;
            // the very first Up after startup stays quiet.
            let important = state.down_count > 0 || state.status == MonitorStatus::Down;
            BeatPlan {
                beat_status: MonitorStatus::Up,
                message: result.message.clone(),
                ping_ms: result.ping_ms,
                retries_left: monitor.max_retries,
                down_count: 0,
                beats_since_notified: 0,
                important,
                transition_to: (state.status != MonitorStatus::Up).then_some(MonitorStatus::Up),
                pace: TickPace::Normal,
            }
        }

        ProbeStatus::Pending => BeatPlan {
            beat_status: MonitorStatus::Pending,
            message: result.message.clone(),
            ping_ms: 0,
            retries_left: monitor.max_retries.saturating_sub(state.down_count),
            down_count: state.down_count,
            beats_since_notified: state.beats_since_notified,
            important: false,
            transition_to: None,
            pace: TickPace::Normal,
        },

        ProbeStatus::Down if state.status == MonitorStatus::Down => {
            let since = state.beats_since_notified + 1;
            let resend_hit = monitor.resend_interval > 0 && since >= monitor.resend_interval;
            BeatPlan {
                beat_status: MonitorStatus::Down,
                message: result.message.clone(),
                ping_ms: 0,
                retries_left: 0,
                down_count: state.down_count + 1,
                beats_since_notified: if resend_hit { 0 } else { since },
                important: resend_hit,
                transition_to: None,
                pace: TickPace::Normal,
            }
        }

        ProbeStatus::Down => {
            let attempts = state.down_count + 1;
            if attempts <= monitor.max_retries {
                // Retry sub-state: the monitor stays in its current status,
                // the beat reports Pending with the remaining retries.
                BeatPlan {
                    beat_status: MonitorStatus::Pending,
                    message: result.message.clone(),
                    ping_ms: 0,
                    retries_left: monitor.max_retries - attempts,
                    down_count: attempts,
                    beats_since_notified: state.beats_since_notified,
                    important: false,
                    transition_to: None,
                    pace: TickPace::Retry,
                }
            } else {
                BeatPlan {
                    beat_status: MonitorStatus::Down,
                    message: result.message.clone(),
                    ping_ms: 0,
                    retries_left: 0,
                    down_count: attempts,
                    beats_since_notified: 0,
                    important: true,
                    transition_to: Some(MonitorStatus::Down),
                    pace: TickPace::Normal,
                }
            }
        }
    }
}

/// Handle owned by the manager; dropping it does not stop the task, the
/// manager must call [`RunnerHandle::stop`].
pub struct RunnerHandle {
    monitor_id: String,
    timeout: Duration,
    nudge_tx: mpsc::Sender<()>,
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl RunnerHandle {
    /// Spawn a runner for the monitor.
    pub fn spawn(monitor: Monitor, deps: RunnerDeps) -> Self {
        let (nudge_tx, nudge_rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let monitor_id = monitor.id.clone();
        let timeout = monitor.timeout();

        let runner = MonitorRunner {
            monitor,
            deps,
            token: token.clone(),
            nudge_rx,
            state: RunState::initial(),
            started_at: Utc::now(),
        };
        let join = tokio::spawn(runner.run());

        Self {
            monitor_id,
            timeout,
            nudge_tx,
            token,
            join,
        }
    }

    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    /// Request an immediate re-tick; coalesced if one is already queued.
    pub fn nudge(&self) {
        let _ = self.nudge_tx.try_send(());
    }

    /// Cancel the runner and wait for it to drain. An in-flight probe may
    /// finish under its own deadline; the wait is bounded by twice the
    /// monitor timeout.
    pub async fn stop(mut self) {
        self.token.cancel();
        let grace = self.timeout * 2 + Duration::from_secs(1);
        if tokio::time::timeout(grace, &mut self.join).await.is_err() {
            warn!(monitor = %self.monitor_id, "runner exceeded shutdown grace, aborting");
            self.join.abort();
        }
    }
}

struct MonitorRunner {
    monitor: Monitor,
    deps: RunnerDeps,
    token: CancellationToken,
    nudge_rx: mpsc::Receiver<()>,
    state: RunState,
    started_at: DateTime<Utc>,
}

impl MonitorRunner {
    #[instrument(skip(self), fields(monitor = %self.monitor.name))]
    async fn run(mut self) {
        debug!("starting monitor runner");

        // First tick fires immediately.
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep_until(next_tick) => {}
                Some(_) = self.nudge_rx.recv() => {
                    debug!("nudged, ticking now");
                }
            }
            if self.token.is_cancelled() {
                break;
            }

            let tick_start = Instant::now();
            // A cancelled runner lets the in-flight tick finish, but never
            // beyond twice the probe timeout.
            let hard_stop = self.monitor.timeout() * 2;
            let pace = match tokio::time::timeout(hard_stop, self.tick()).await {
                Ok(pace) => pace,
                Err(_) => {
                    warn!("tick exceeded hard stop of {hard_stop:?}");
                    TickPace::Normal
                }
            };

            // No catch-up bursts: the next tick anchors on this tick's
            // start, and an overdue deadline fires exactly once.
            let delay = match pace {
                TickPace::Normal => self.monitor.interval(),
                TickPace::Retry => self.monitor.retry_interval(),
            };
            next_tick = tick_start + delay;
        }

        debug!("monitor runner stopped");
    }

    async fn tick(&mut self) -> TickPace {
        let now = self.deps.clock.now();

        let under_maintenance = match self
            .deps
            .maintenance
            .active_for_monitor(&self.monitor.id, now)
            .await
        {
            Ok(active) => active,
            Err(e) => {
                warn!("maintenance lookup failed, assuming none: {e}");
                false
            }
        };

        if under_maintenance {
            let plan = BeatPlan {
                beat_status: MonitorStatus::Maintenance,
                message: "maintenance window active".to_string(),
                ping_ms: 0,
                retries_left: self.monitor.max_retries.saturating_sub(self.state.down_count),
                down_count: self.state.down_count,
                beats_since_notified: self.state.beats_since_notified,
                important: false,
                transition_to: (self.state.status != MonitorStatus::Maintenance)
                    .then_some(MonitorStatus::Maintenance),
                pace: TickPace::Normal,
            };
            self.emit(plan, now).await;
            return TickPace::Normal;
        }

        // Leaving a window lands here on the next wake-up (the manager
        // nudges on boundary crossings) and probes immediately.
        if self.monitor.kind == MonitorKind::Push {
            return self.watchdog_tick(now).await;
        }

        let proxy = match &self.monitor.proxy_id {
            Some(proxy_id) => match self.deps.proxies.find_by_id(proxy_id).await {
                Ok(proxy) => proxy,
                Err(e) => {
                    warn!("proxy {proxy_id} lookup failed: {e}");
                    None
                }
            },
            None => None,
        };

        let result = self
            .deps
            .probes
            .execute(&self.monitor, proxy.as_ref(), self.token.child_token())
            .await;

        let plan = decide(&self.state, &self.monitor, &result);
        let pace = plan.pace;
        self.emit(plan, now).await;
        pace
    }

    /// Push monitors have no probe; the watchdog turns a missing push
    /// heartbeat into a Down result once interval + timeout have elapsed.
    async fn watchdog_tick(&mut self, now: DateTime<Utc>) -> TickPace {
        let last = self
            .deps
            .heartbeats
            .repo()
            .find_last_n(&self.monitor.id, 1)
            .await
            .unwrap_or_default()
            .into_iter()
            .next();

        let grace = chrono::Duration::seconds(
            (self.monitor.interval_secs + self.monitor.timeout_secs) as i64,
        );
        let reference = last.as_ref().map(|b| b.time).unwrap_or(self.started_at);

        if now - reference <= grace {
            // Pushes are flowing; adopt their view of the world so a later
            // expiry transitions from the right state.
            if let Some(last) = &last {
                if last.status != MonitorStatus::Maintenance {
                    self.state.status = last.status;
                    self.state.down_count = last.down_count;
                    self.state.last_beat_time = Some(last.time);
                }
            }
            return TickPace::Normal;
        }

        let result = ProbeResult::down(format!(
            "no heartbeat received for {} seconds",
            (now - reference).num_seconds()
        ));
        let plan = decide(&self.state, &self.monitor, &result);
        let pace = plan.pace;
        self.emit(plan, now).await;
        pace
    }

    /// Build the heartbeat from a plan, persist it, publish events, and
    /// advance the state machine.
    async fn emit(&mut self, plan: BeatPlan, now: DateTime<Utc>) {
        let mut beat = Heartbeat::new(&self.monitor.id, plan.beat_status, now);
        beat.msg = plan.message;
        beat.ping_ms = plan.ping_ms;
        beat.duration_ms = self
            .state
            .last_beat_time
            .map(|t| (now - t).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        beat.down_count = plan.down_count;
        beat.retries = plan.retries_left;
        beat.important = plan.important;
        beat.end_time = now + chrono::Duration::milliseconds(plan.ping_ms as i64);

        let persisted = self.deps.heartbeats.record(beat).await;

        if let Some(new_status) = plan.transition_to {
            debug!(
                "status transition {} -> {}",
                self.state.status, new_status
            );
            self.state.status = new_status;
            if let Some(beat) = persisted {
                self.deps.bus.publish(Event::MonitorStatusChanged(beat));
            }
        }

        self.state.down_count = plan.down_count;
        self.state.beats_since_notified = plan.beats_since_notified;
        self.state.last_beat_time = Some(now);
    }
}
