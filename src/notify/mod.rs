//! Notification dispatcher
//!
//! Consumes `HeartbeatCreated` events and fans important beats out to the
//! channels linked to the monitor. Gating rules:
//!
//! 1. Important beats always notify.
//! 2. Ordinary Down beats notify again on every `resend_interval`-th
//!    consecutive Down beat since the last notified one.
//! 3. A monitor inside a maintenance window never notifies.
//!
//! Each channel sender is a pure `{unmarshal, validate, send}`
//! implementation; a sender failure is retried twice with backoff and then
//! logged, never crashing the dispatcher or blocking sibling channels.

pub mod discord;
pub mod ntfy;
pub mod slack;
pub mod telegram;
pub mod template;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use crate::bus::{self, EventBus};
use crate::events::Event;
use crate::maintenance::MaintenanceService;
use crate::model::{ChannelKind, Heartbeat, Monitor, MonitorStatus, NotificationChannel};
use crate::repo::{HeartbeatRepository, MonitorRepository, NotificationChannelRepository};

/// Per-channel delivery deadline.
const SEND_DEADLINE: Duration = Duration::from_secs(30);

/// Backoff before the first and second retry.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(4)];

/// How many recent beats the resend rule is willing to scan.
const RESEND_SCAN_LIMIT: usize = 100;

/// Fallback template when a channel config carries none.
const DEFAULT_TEMPLATE: &str = "[{{ monitor.name }}] {% if status == \"up\" %}✅ Up{% else %}🔴 {{ status }}{% endif %}{% if msg %}: {{ msg }}{% endif %}";

/// Errors raised by channel senders.
#[derive(Debug)]
pub enum NotifyError {
    /// Malformed channel config; not retried.
    Config(String),

    /// Delivery failure; retried with backoff.
    Send(String),
}

impl std::fmt::Display for NotifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyError::Config(msg) => write!(f, "invalid channel config: {}", msg),
            NotifyError::Send(msg) => write!(f, "delivery failed: {}", msg),
        }
    }
}

impl std::error::Error for NotifyError {}

/// One notification channel implementation.
#[async_trait]
pub trait Sender: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Parse-only check of a channel config.
    fn validate(&self, config: &str) -> Result<(), NotifyError>;

    async fn send(
        &self,
        config: &str,
        message: &str,
        monitor: &Monitor,
        heartbeat: &Heartbeat,
    ) -> Result<(), NotifyError>;
}

/// Maps channel kinds to senders.
pub struct SenderRegistry {
    senders: HashMap<ChannelKind, Arc<dyn Sender>>,
}

impl Default for SenderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            senders: HashMap::new(),
        };
        registry.register(Arc::new(webhook::WebhookSender::new()));
        registry.register(Arc::new(discord::DiscordSender::new()));
        registry.register(Arc::new(slack::SlackSender::new()));
        registry.register(Arc::new(telegram::TelegramSender::new()));
        registry.register(Arc::new(ntfy::NtfySender::new()));
        registry
    }
}

impl SenderRegistry {
    pub fn empty() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    pub fn register(&mut self, sender: Arc<dyn Sender>) {
        self.senders.insert(sender.kind(), sender);
    }

    pub fn get(&self, kind: ChannelKind) -> Option<Arc<dyn Sender>> {
        self.senders.get(&kind).cloned()
    }
}

/// Shared collaborators of the dispatcher.
#[derive(Clone)]
pub struct DispatcherDeps {
    pub monitors: Arc<dyn MonitorRepository>,
    pub heartbeats: Arc<dyn HeartbeatRepository>,
    pub channels: Arc<dyn NotificationChannelRepository>,
    pub maintenance: MaintenanceService,
    pub senders: Arc<SenderRegistry>,
    pub clock: crate::clock::Clock,
}

/// Handle for the dispatcher task.
pub struct DispatcherHandle {
    token: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl DispatcherHandle {
    /// Subscribe to the bus and start dispatching.
    pub fn spawn(bus: EventBus, deps: DispatcherDeps) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let mut rx = bus.subscribe();

        let join = tokio::spawn(async move {
            debug!("starting notification dispatcher");
            loop {
                let event = tokio::select! {
                    _ = task_token.cancelled() => break,
                    event = bus::next_event("dispatcher", &mut rx) => event,
                };
                match event {
                    Some(Event::HeartbeatCreated(heartbeat)) => {
                        handle_heartbeat(&deps, heartbeat).await;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            debug!("notification dispatcher stopped");
        });

        Self { token, join }
    }

    pub async fn stop(mut self) {
        self.token.cancel();
        if tokio::time::timeout(Duration::from_secs(5), &mut self.join)
            .await
            .is_err()
        {
            warn!("dispatcher did not stop in time, aborting");
            self.join.abort();
        }
    }
}

#[instrument(skip_all, fields(monitor = %heartbeat.monitor_id))]
async fn handle_heartbeat(deps: &DispatcherDeps, heartbeat: Heartbeat) {
    let monitor = match deps.monitors.find_by_id(&heartbeat.monitor_id).await {
        Ok(Some(monitor)) => monitor,
        Ok(None) => {
            debug!("monitor gone, discarding beat");
            return;
        }
        Err(e) => {
            warn!("monitor lookup failed: {e}");
            return;
        }
    };
    if !monitor.active {
        return;
    }

    if !is_notifiable(deps, &monitor, &heartbeat).await {
        return;
    }

    let now = deps.clock.now();
    match deps.maintenance.active_for_monitor(&monitor.id, now).await {
        Ok(true) => {
            debug!("suppressing notification, monitor under maintenance");
            return;
        }
        Ok(false) => {}
        Err(e) => warn!("maintenance lookup failed, not suppressing: {e}"),
    }

    let channels = match deps.channels.find_for_monitor(&monitor.id).await {
        Ok(channels) => channels,
        Err(e) => {
            warn!("channel lookup failed: {e}");
            return;
        }
    };

    let context = json!({
        "monitor": &monitor,
        "heartbeat": &heartbeat,
        "status": heartbeat.status.as_str(),
        "msg": &heartbeat.msg,
    });

    let deliveries = channels
        .into_iter()
        .filter(|c| c.active)
        .map(|channel| deliver_to_channel(deps, channel, &monitor, &heartbeat, &context));
    futures::future::join_all(deliveries).await;

    if let Err(e) = deps.heartbeats.set_notified(&heartbeat.id).await {
        warn!("failed to mark heartbeat notified: {e}");
    }
}

/// Apply the gating rules of the dispatcher.
async fn is_notifiable(deps: &DispatcherDeps, monitor: &Monitor, heartbeat: &Heartbeat) -> bool {
    if heartbeat.important {
        return true;
    }
    if heartbeat.status != MonitorStatus::Down || monitor.resend_interval == 0 {
        return false;
    }

    // Count consecutive Down beats since the last notified one, the
    // current beat included.
    let recent = match deps
        .heartbeats
        .find_last_n(&monitor.id, RESEND_SCAN_LIMIT)
        .await
    {
        Ok(recent) => recent,
        Err(e) => {
            warn!("resend scan failed: {e}");
            return false;
        }
    };

    let mut consecutive = 0u32;
    for beat in &recent {
        if beat.status != MonitorStatus::Down {
            break;
        }
        if beat.notified {
            break;
        }
        consecutive += 1;
    }

    consecutive > 0 && consecutive % monitor.resend_interval == 0
}

async fn deliver_to_channel(
    deps: &DispatcherDeps,
    channel: NotificationChannel,
    monitor: &Monitor,
    heartbeat: &Heartbeat,
    context: &serde_json::Value,
) {
    let Some(sender) = deps.senders.get(channel.kind) else {
        warn!(channel = %channel.name, "no sender registered for {}", channel.kind);
        return;
    };

    if let Err(e) = sender.validate(&channel.config) {
        warn!(channel = %channel.name, "skipping channel: {e}");
        return;
    }

    let message = match render_channel_message(&channel, context) {
        Ok(message) => message,
        Err(e) => {
            warn!(channel = %channel.name, "template failed, skipping: {e}");
            return;
        }
    };

    for attempt in 0..=RETRY_BACKOFF.len() {
        let outcome = tokio::time::timeout(
            SEND_DEADLINE,
            sender.send(&channel.config, &message, monitor, heartbeat),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {
                debug!(channel = %channel.name, "notification delivered");
                return;
            }
            Ok(Err(NotifyError::Config(msg))) => {
                warn!(channel = %channel.name, "skipping channel: {msg}");
                return;
            }
            Ok(Err(NotifyError::Send(msg))) => {
                if attempt < RETRY_BACKOFF.len() {
                    warn!(channel = %channel.name, "delivery failed, will retry: {msg}");
                    tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                } else {
                    error!(channel = %channel.name, "delivery failed after retries: {msg}");
                }
            }
            Err(_) => {
                if attempt < RETRY_BACKOFF.len() {
                    warn!(channel = %channel.name, "delivery timed out, will retry");
                    tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                } else {
                    error!(channel = %channel.name, "delivery timed out after retries");
                }
            }
        }
    }
}

/// Channel configs may carry a custom Liquid template under `template`.
fn render_channel_message(
    channel: &NotificationChannel,
    context: &serde_json::Value,
) -> Result<String, template::TemplateError> {
    let custom = serde_json::from_str::<serde_json::Value>(&channel.config)
        .ok()
        .and_then(|config| config.get("template").and_then(|t| t.as_str()).map(str::to_string));
    let tmpl = custom.as_deref().unwrap_or(DEFAULT_TEMPLATE);
    template::render(tmpl, context)
}
