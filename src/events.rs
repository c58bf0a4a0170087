//! Typed events flowing through the bus.
//!
//! Events are cloneable snapshots; subscribers must not expect to observe
//! every event (the bus drops the oldest entries for a lagging subscriber
//! rather than blocking producers).

use crate::model::{Heartbeat, Monitor};

#[derive(Debug, Clone)]
pub enum Event {
    /// A heartbeat was persisted.
    HeartbeatCreated(Heartbeat),

    /// A monitor's status changed; the heartbeat is the transition beat.
    MonitorStatusChanged(Heartbeat),

    /// A monitor's definition changed (published by the API layer).
    MonitorUpdated(Monitor),

    /// A monitor was deleted.
    MonitorDeleted(String),

    /// Some maintenance definition or link changed.
    MaintenanceChanged,

    /// A notification channel's definition changed.
    NotificationChannelUpdated(String),
}

impl Event {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Event::HeartbeatCreated(_) => "heartbeat_created",
            Event::MonitorStatusChanged(_) => "monitor_status_changed",
            Event::MonitorUpdated(_) => "monitor_updated",
            Event::MonitorDeleted(_) => "monitor_deleted",
            Event::MaintenanceChanged => "maintenance_changed",
            Event::NotificationChannelUpdated(_) => "notification_channel_updated",
        }
    }
}
