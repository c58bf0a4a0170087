//! Domain model shared across the monitoring core.
//!
//! All identifiers are opaque strings; storage backends translate to their
//! own id types internally and never leak them above the repository
//! boundary. Validation that belongs to the domain (not the database) lives
//! here, most importantly the `timeout × 0.8 < interval` rule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a monitor (and of the heartbeats it produces).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Up,
    Down,
    Pending,
    Maintenance,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
            MonitorStatus::Pending => "pending",
            MonitorStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Probe kind of a monitor.
///
/// Each kind maps to one executor in the probe registry; `Push` is passive
/// and has no executor (heartbeats arrive through
/// [`submit_push`](crate::manager::MonitorManager::submit_push)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MonitorKind {
    Http,
    Push,
    Tcp,
    Ping,
    Dns,
    Mqtt,
    Postgres,
    Mysql,
    Mariadb,
    Mssql,
    Mongodb,
    Redis,
    Rabbitmq,
    Grpc,
    Docker,
    Snmp,
    KafkaProducer,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::Http => "http",
            MonitorKind::Push => "push",
            MonitorKind::Tcp => "tcp",
            MonitorKind::Ping => "ping",
            MonitorKind::Dns => "dns",
            MonitorKind::Mqtt => "mqtt",
            MonitorKind::Postgres => "postgres",
            MonitorKind::Mysql => "mysql",
            MonitorKind::Mariadb => "mariadb",
            MonitorKind::Mssql => "mssql",
            MonitorKind::Mongodb => "mongodb",
            MonitorKind::Redis => "redis",
            MonitorKind::Rabbitmq => "rabbitmq",
            MonitorKind::Grpc => "grpc",
            MonitorKind::Docker => "docker",
            MonitorKind::Snmp => "snmp",
            MonitorKind::KafkaProducer => "kafka-producer",
        }
    }
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    /// Opaque identifier.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Probe kind.
    pub kind: MonitorKind,

    /// Seconds between ticks (≥ 1).
    pub interval_secs: u64,

    /// Probe deadline in seconds. Must satisfy `timeout × 0.8 < interval`.
    pub timeout_secs: u64,

    /// Consecutive failures tolerated before the monitor goes Down.
    pub max_retries: u32,

    /// Shortened tick interval while in the retry sub-state (≥ 1).
    pub retry_interval_secs: u64,

    /// Re-notify every N consecutive Down beats; 0 disables resend.
    pub resend_interval: u32,

    /// Whether a runner should exist for this monitor.
    pub active: bool,

    /// Latest known status, persisted by the manager on transitions.
    pub status: MonitorStatus,

    /// Optional HTTP proxy reference.
    pub proxy_id: Option<String>,

    /// Token identifying push-type monitors on the ingress path.
    pub push_token: Option<String>,

    /// Kind-specific configuration, serialized JSON.
    pub config: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Build a monitor with defaults suitable for most probe kinds.
    ///
    /// Callers adjust fields afterwards and must run [`Monitor::validate`]
    /// before handing the record to the manager.
    pub fn new(name: impl Into<String>, kind: MonitorKind, config: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            interval_secs: 60,
            timeout_secs: 48,
            max_retries: 0,
            retry_interval_secs: 60,
            resend_interval: 0,
            active: true,
            status: MonitorStatus::Pending,
            proxy_id: None,
            push_token: None,
            config: config.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Domain validation, enforced at construction/update time.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::Invalid("monitor name must not be empty".into()));
        }
        if self.interval_secs < 1 {
            return Err(ModelError::Invalid("interval must be at least 1 second".into()));
        }
        if self.retry_interval_secs < 1 {
            return Err(ModelError::Invalid(
                "retry interval must be at least 1 second".into(),
            ));
        }
        // Timeouts close to (or beyond) the interval would let probe
        // invocations overlap their own schedule.
        if self.timeout_secs as f64 * 0.8 >= self.interval_secs as f64 {
            return Err(ModelError::Invalid(format!(
                "timeout {}s is too long for interval {}s (timeout × 0.8 must stay below the interval)",
                self.timeout_secs, self.interval_secs
            )));
        }
        if self.kind == MonitorKind::Mssql {
            return Err(ModelError::Invalid(
                "mssql monitors are not supported by this build".into(),
            ));
        }
        if self.kind == MonitorKind::Push && self.push_token.as_deref().unwrap_or("").is_empty() {
            return Err(ModelError::Invalid(
                "push monitors require a push_token".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_interval_secs)
    }
}

/// One observation produced by a monitor at one tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub id: String,
    pub monitor_id: String,
    pub status: MonitorStatus,

    /// Human-readable outcome, never empty for Down beats.
    pub msg: String,

    /// Measured latency in milliseconds; 0 when down.
    pub ping_ms: u32,

    /// Milliseconds since the previous beat of this monitor; 0 for the first.
    pub duration_ms: u64,

    /// Consecutive failed attempts, retries included.
    pub down_count: u32,

    /// Retries remaining before promotion to Down.
    pub retries: u32,

    /// Carries a notification obligation.
    pub important: bool,

    /// Tick start, UTC.
    pub time: DateTime<Utc>,

    /// `time` + latency.
    pub end_time: DateTime<Utc>,

    /// Set by the dispatcher once delivery has been attempted.
    pub notified: bool,
}

impl Heartbeat {
    pub fn new(monitor_id: impl Into<String>, status: MonitorStatus, time: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            monitor_id: monitor_id.into(),
            status,
            msg: String::new(),
            ping_ms: 0,
            duration_ms: 0,
            down_count: 0,
            retries: 0,
            important: false,
            time,
            end_time: time,
            notified: false,
        }
    }
}

/// Day-of-month entry for the recurring-day-of-month strategy.
///
/// Canonical JSON form is an integer 1..=31, or the string `"last"` for the
/// last day of whatever month is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthDay {
    Day(u8),
    Last,
}

impl Serialize for MonthDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MonthDay::Day(d) => serializer.serialize_u8(*d),
            MonthDay::Last => serializer.serialize_str("last"),
        }
    }
}

impl<'de> Deserialize<'de> for MonthDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(n) => {
                let d = n
                    .as_u64()
                    .filter(|d| (1..=31).contains(d))
                    .ok_or_else(|| D::Error::custom("day of month must be in 1..=31"))?;
                Ok(MonthDay::Day(d as u8))
            }
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("last") => Ok(MonthDay::Last),
            other => Err(D::Error::custom(format!(
                "invalid day-of-month entry: {other}"
            ))),
        }
    }
}

/// Scheduling strategy of a maintenance window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum MaintenanceStrategy {
    /// Active for as long as the maintenance itself is enabled.
    Manual,

    /// One window bounded by `start_date_time` and `end_date_time`.
    Single,

    /// Fires on a cron schedule, staying active for `duration_minutes`.
    Cron { cron: String, duration_minutes: u32 },

    /// Every `interval_days` days, between `start_time` and `end_time`.
    RecurringInterval {
        interval_days: u32,
        start_time: String,
        end_time: String,
    },

    /// On the listed weekdays (0 = Sunday .. 6 = Saturday).
    RecurringWeekday {
        weekdays: Vec<u8>,
        start_time: String,
        end_time: String,
    },

    /// On the listed days of the month.
    RecurringDayOfMonth {
        days_of_month: Vec<MonthDay>,
        start_time: String,
        end_time: String,
    },
}

/// A maintenance window definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Maintenance {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub active: bool,

    #[serde(flatten)]
    pub strategy: MaintenanceStrategy,

    /// IANA name, `"UTC"`, or `"SAME_AS_SERVER"`.
    pub timezone: String,

    /// Bounds the whole strategy's validity, not a single occurrence
    /// (except for the `single` strategy, where it is the occurrence).
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
}

impl Maintenance {
    pub fn new(title: impl Into<String>, strategy: MaintenanceStrategy) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            active: true,
            strategy,
            timezone: "SAME_AS_SERVER".to_string(),
            start_date_time: None,
            end_date_time: None,
        }
    }
}

/// Notification channel kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Webhook,
    Discord,
    Slack,
    Telegram,
    Ntfy,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Webhook => "webhook",
            ChannelKind::Discord => "discord",
            ChannelKind::Slack => "slack",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Ntfy => "ntfy",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A configured notification channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,

    /// Kind-specific configuration, serialized JSON. May carry a custom
    /// `template` field rendered by the dispatcher.
    pub config: String,

    pub active: bool,
}

impl NotificationChannel {
    pub fn new(name: impl Into<String>, kind: ChannelKind, config: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            config: config.into(),
            active: true,
        }
    }
}

/// Optional per-monitor HTTP proxy, consumed only by the HTTP probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proxy {
    pub id: String,
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub active: bool,
}

impl Proxy {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

/// One aggregation bucket of heartbeat statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    /// Bucket start, Unix milliseconds.
    pub timestamp_ms: i64,
    pub up: u32,
    pub down: u32,
    pub avg_ping: f64,
    pub min_ping: u32,
    pub max_ping: u32,
    pub maintenance: u32,
}

impl ChartPoint {
    pub fn empty(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            up: 0,
            down: 0,
            avg_ping: 0.0,
            min_ping: 0,
            max_ping: 0,
            maintenance: 0,
        }
    }
}

/// Chart/uptime aggregation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    /// Bucket width in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            Granularity::Minute => 60_000,
            Granularity::Hour => 3_600_000,
            Granularity::Day => 86_400_000,
        }
    }
}

/// Errors raised by domain validation.
#[derive(Debug)]
pub enum ModelError {
    Invalid(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::Invalid(msg) => write!(f, "invalid model: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}
