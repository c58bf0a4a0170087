//! Monitor manager
//!
//! Owns every runner handle and serializes lifecycle transitions behind one
//! async mutex. Reacts to bus events: definition updates restart runners
//! when scheduling-relevant fields changed, deletions cancel the runner and
//! sweep dependent heartbeats and relationship rows, status transitions are
//! persisted back onto the monitor record, and maintenance changes nudge
//! everyone so window boundaries take effect without waiting out an
//! interval. The push ingress enters the heartbeat stream here via
//! [`MonitorManager::submit_push`].

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bus;
use crate::events::Event;
use crate::model::{Heartbeat, Monitor, MonitorKind, MonitorStatus};
use crate::repo::{
    HeartbeatRepository, MaintenanceRepository, MonitorRepository,
    NotificationChannelRepository, RepoError, StatusPageRepository,
};
use crate::runner::{RunnerDeps, RunnerHandle};

/// Errors surfaced by manager entry points.
#[derive(Debug)]
pub enum ManagerError {
    MonitorNotFound(String),
    NotAPushMonitor(String),
    Repo(RepoError),
}

impl std::fmt::Display for ManagerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerError::MonitorNotFound(id) => write!(f, "monitor {id} not found"),
            ManagerError::NotAPushMonitor(id) => {
                write!(f, "monitor {id} does not accept push heartbeats")
            }
            ManagerError::Repo(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ManagerError {}

impl From<RepoError> for ManagerError {
    fn from(e: RepoError) -> Self {
        ManagerError::Repo(e)
    }
}

/// Hash of the fields that force a runner restart when they change.
fn schedule_fingerprint(monitor: &Monitor) -> u64 {
    let mut hasher = DefaultHasher::new();
    monitor.interval_secs.hash(&mut hasher);
    monitor.timeout_secs.hash(&mut hasher);
    monitor.max_retries.hash(&mut hasher);
    monitor.retry_interval_secs.hash(&mut hasher);
    monitor.resend_interval.hash(&mut hasher);
    monitor.kind.hash(&mut hasher);
    monitor.config.hash(&mut hasher);
    monitor.proxy_id.hash(&mut hasher);
    monitor.push_token.hash(&mut hasher);
    hasher.finish()
}

struct RunnerEntry {
    handle: RunnerHandle,
    fingerprint: u64,
}

struct Inner {
    runners: Mutex<HashMap<String, RunnerEntry>>,
    monitors: Arc<dyn MonitorRepository>,
    maintenances: Arc<dyn MaintenanceRepository>,
    channels: Arc<dyn NotificationChannelRepository>,
    status_pages: Arc<dyn StatusPageRepository>,
    deps: RunnerDeps,
    token: CancellationToken,
}

#[derive(Clone)]
pub struct MonitorManager {
    inner: Arc<Inner>,
}

impl MonitorManager {
    pub fn new(
        monitors: Arc<dyn MonitorRepository>,
        maintenances: Arc<dyn MaintenanceRepository>,
        channels: Arc<dyn NotificationChannelRepository>,
        status_pages: Arc<dyn StatusPageRepository>,
        deps: RunnerDeps,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                runners: Mutex::new(HashMap::new()),
                monitors,
                maintenances,
                channels,
                status_pages,
                deps,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Spawn one runner per active monitor and start consuming bus events.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), ManagerError> {
        // Subscribe before the first runner ticks so no startup transition
        // is missed.
        let mut rx = self.inner.deps.bus.subscribe();

        let monitors = self.inner.monitors.find_active().await?;
        info!("starting runners for {} active monitors", monitors.len());

        {
            let mut runners = self.inner.runners.lock().await;
            for monitor in monitors {
                if let Err(e) = monitor.validate() {
                    warn!(monitor = %monitor.name, "skipping invalid monitor: {e}");
                    continue;
                }
                Self::spawn_locked(&self.inner, &mut runners, monitor);
            }
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = inner.token.cancelled() => break,
                    event = bus::next_event("manager", &mut rx) => event,
                };
                match event {
                    Some(event) => Self::handle_event(&inner, event).await,
                    None => break,
                }
            }
            debug!("manager event loop stopped");
        });

        Ok(())
    }

    fn spawn_locked(
        inner: &Arc<Inner>,
        runners: &mut HashMap<String, RunnerEntry>,
        monitor: Monitor,
    ) {
        let id = monitor.id.clone();
        let fingerprint = schedule_fingerprint(&monitor);
        debug!(monitor = %monitor.name, "spawning runner");
        let handle = RunnerHandle::spawn(monitor, inner.deps.clone());
        runners.insert(
            id,
            RunnerEntry {
                handle,
                fingerprint,
            },
        );
    }

    /// Start a runner for the monitor if none exists yet.
    pub async fn start_monitor(&self, monitor_id: &str) -> Result<(), ManagerError> {
        let monitor = self
            .inner
            .monitors
            .find_by_id(monitor_id)
            .await?
            .ok_or_else(|| ManagerError::MonitorNotFound(monitor_id.to_string()))?;
        if !monitor.active {
            return Ok(());
        }

        let mut runners = self.inner.runners.lock().await;
        if runners.contains_key(monitor_id) {
            return Ok(());
        }
        Self::spawn_locked(&self.inner, &mut runners, monitor);
        Ok(())
    }

    /// Cancel and drain the monitor's runner, if any.
    pub async fn stop_monitor(&self, monitor_id: &str) {
        let entry = {
            let mut runners = self.inner.runners.lock().await;
            runners.remove(monitor_id)
        };
        if let Some(entry) = entry {
            debug!("stopping runner for {monitor_id}");
            entry.handle.stop().await;
        }
    }

    /// Request an immediate re-tick.
    pub async fn nudge(&self, monitor_id: &str) {
        let runners = self.inner.runners.lock().await;
        if let Some(entry) = runners.get(monitor_id) {
            entry.handle.nudge();
        }
    }

    async fn nudge_all(&self) {
        let runners = self.inner.runners.lock().await;
        for entry in runners.values() {
            entry.handle.nudge();
        }
    }

    pub async fn runner_count(&self) -> usize {
        self.inner.runners.lock().await.len()
    }

    pub async fn has_runner(&self, monitor_id: &str) -> bool {
        self.inner.runners.lock().await.contains_key(monitor_id)
    }

    /// Ingress for push monitors: synthesize a heartbeat, publish the
    /// events a probe tick would have produced, and reset the watchdog.
    #[instrument(skip(self, msg))]
    pub async fn submit_push(
        &self,
        monitor_id: &str,
        status: MonitorStatus,
        ping_ms: u32,
        msg: &str,
    ) -> Result<Heartbeat, ManagerError> {
        let monitor = self
            .inner
            .monitors
            .find_by_id(monitor_id)
            .await?
            .ok_or_else(|| ManagerError::MonitorNotFound(monitor_id.to_string()))?;
        if monitor.kind != MonitorKind::Push {
            return Err(ManagerError::NotAPushMonitor(monitor_id.to_string()));
        }

        let now = self.inner.deps.clock.now();
        let previous = self
            .inner
            .deps
            .heartbeats
            .repo()
            .find_last_n(monitor_id, 1)
            .await?
            .into_iter()
            .next();

        let prev_status = previous.as_ref().map(|b| b.status);
        let mut beat = Heartbeat::new(monitor_id, status, now);
        beat.msg = msg.to_string();
        beat.ping_ms = if status == MonitorStatus::Up { ping_ms } else { 0 };
        beat.end_time = now + chrono::Duration::milliseconds(beat.ping_ms as i64);
        beat.duration_ms = previous
            .as_ref()
            .map(|b| (now - b.time).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        beat.down_count = match status {
            MonitorStatus::Down => previous.map(|b| b.down_count).unwrap_or(0) + 1,
            _ => 0,
        };
        beat.important = match (prev_status, status) {
            (Some(MonitorStatus::Down), MonitorStatus::Up) => true,
            (Some(MonitorStatus::Down), MonitorStatus::Down) => false,
            (_, MonitorStatus::Down) => true,
            _ => false,
        };

        let persisted = self
            .inner
            .deps
            .heartbeats
            .record(beat)
            .await
            .ok_or_else(|| {
                ManagerError::Repo(RepoError::QueryFailed(
                    "push heartbeat could not be persisted".to_string(),
                ))
            })?;

        if monitor.status != status {
            self.inner
                .deps
                .bus
                .publish(Event::MonitorStatusChanged(persisted.clone()));
        }
        self.nudge(monitor_id).await;

        Ok(persisted)
    }

    async fn handle_event(inner: &Arc<Inner>, event: Event) {
        let manager = MonitorManager {
            inner: inner.clone(),
        };
        match event {
            Event::MonitorUpdated(monitor) => {
                debug!(monitor = %monitor.name, "monitor updated");
                if !monitor.active {
                    manager.stop_monitor(&monitor.id).await;
                    return;
                }
                if let Err(e) = monitor.validate() {
                    warn!(monitor = %monitor.name, "not (re)starting invalid monitor: {e}");
                    manager.stop_monitor(&monitor.id).await;
                    return;
                }

                let needs_restart = {
                    let runners = inner.runners.lock().await;
                    match runners.get(&monitor.id) {
                        Some(entry) => entry.fingerprint != schedule_fingerprint(&monitor),
                        None => true,
                    }
                };
                if needs_restart {
                    manager.stop_monitor(&monitor.id).await;
                    let mut runners = inner.runners.lock().await;
                    Self::spawn_locked(inner, &mut runners, monitor);
                }
            }

            Event::MonitorDeleted(monitor_id) => {
                debug!("monitor {monitor_id} deleted, sweeping dependents");
                manager.stop_monitor(&monitor_id).await;

                if let Err(e) = inner
                    .deps
                    .heartbeats
                    .repo()
                    .delete_by_monitor(&monitor_id)
                    .await
                {
                    error!("failed to delete heartbeats of {monitor_id}: {e}");
                }
                if let Err(e) = inner.maintenances.unlink_all_for_monitor(&monitor_id).await {
                    error!("failed to unlink maintenances of {monitor_id}: {e}");
                }
                if let Err(e) = inner.channels.unlink_all_for_monitor(&monitor_id).await {
                    error!("failed to unlink channels of {monitor_id}: {e}");
                }
                if let Err(e) = inner.status_pages.unlink_all_for_monitor(&monitor_id).await {
                    error!("failed to unlink status pages of {monitor_id}: {e}");
                }
            }

            Event::MonitorStatusChanged(beat) => {
                if let Err(e) = inner
                    .monitors
                    .update_status(&beat.monitor_id, beat.status)
                    .await
                {
                    warn!("failed to persist status of {}: {e}", beat.monitor_id);
                }
            }

            Event::MaintenanceChanged => {
                debug!("maintenance changed, nudging all runners");
                manager.nudge_all().await;
            }

            Event::HeartbeatCreated(_) | Event::NotificationChannelUpdated(_) => {}
        }
    }

    /// Stop the event loop and drain every runner.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("shutting down monitor manager");
        self.inner.token.cancel();

        let entries: Vec<RunnerEntry> = {
            let mut runners = self.inner.runners.lock().await;
            runners.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.handle.stop().await;
        }
        info!("all runners stopped");
    }
}
