//! SQLite repository backend
//!
//! Embedded persistence via sqlx: WAL mode for concurrent reads during
//! writes, a small connection pool, and automatic migrations from
//! `./migrations`. Suited to single-node deployments; heartbeat reads lean
//! on the `(monitor_id, time DESC)` index.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument};

use crate::model::{
    ChannelKind, ChartPoint, Heartbeat, Maintenance, Monitor, MonitorKind, MonitorStatus,
    NotificationChannel, Proxy,
};

use super::error::{RepoError, RepoResult};
use super::{
    HeartbeatRepository, ListQuery, MaintenanceRepository, MonitorRepository,
    NotificationChannelRepository, ProxyRepository, StatusPageRepository, UptimePeriod,
    chart_points_from_beats,
};

/// SQLite-backed store implementing every repository trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `db_path` and run
    /// migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> RepoResult<Self> {
        let db_path = db_path.as_ref();
        info!("initializing SQLite store at {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| RepoError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    fn millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    /// Serialize an enum to its wire string (the serde representation).
    fn enum_str<T: serde::Serialize>(value: &T) -> RepoResult<String> {
        match serde_json::to_value(value)? {
            serde_json::Value::String(s) => Ok(s),
            other => Err(RepoError::SerializationError(format!(
                "expected string representation, got {other}"
            ))),
        }
    }

    fn enum_from_str<T: serde::de::DeserializeOwned>(s: &str) -> RepoResult<T> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|e| RepoError::SerializationError(e.to_string()))
    }

    fn row_to_monitor(row: &sqlx::sqlite::SqliteRow) -> RepoResult<Monitor> {
        Ok(Monitor {
            id: row.get("id"),
            name: row.get("name"),
            kind: Self::enum_from_str::<MonitorKind>(&row.get::<String, _>("kind"))?,
            interval_secs: row.get::<i64, _>("interval_secs") as u64,
            timeout_secs: row.get::<i64, _>("timeout_secs") as u64,
            max_retries: row.get::<i64, _>("max_retries") as u32,
            retry_interval_secs: row.get::<i64, _>("retry_interval_secs") as u64,
            resend_interval: row.get::<i64, _>("resend_interval") as u32,
            active: row.get("active"),
            status: Self::enum_from_str::<MonitorStatus>(&row.get::<String, _>("status"))?,
            proxy_id: row.get("proxy_id"),
            push_token: row.get("push_token"),
            config: row.get("config"),
            created_at: Self::from_millis(row.get("created_at")),
            updated_at: Self::from_millis(row.get("updated_at")),
        })
    }

    fn row_to_heartbeat(row: &sqlx::sqlite::SqliteRow) -> RepoResult<Heartbeat> {
        Ok(Heartbeat {
            id: row.get("id"),
            monitor_id: row.get("monitor_id"),
            status: Self::enum_from_str::<MonitorStatus>(&row.get::<String, _>("status"))?,
            msg: row.get("msg"),
            ping_ms: row.get::<i64, _>("ping_ms") as u32,
            duration_ms: row.get::<i64, _>("duration_ms") as u64,
            down_count: row.get::<i64, _>("down_count") as u32,
            retries: row.get::<i64, _>("retries") as u32,
            important: row.get("important"),
            time: Self::from_millis(row.get("time")),
            end_time: Self::from_millis(row.get("end_time")),
            notified: row.get("notified"),
        })
    }

    async fn beats_in_range(
        &self,
        monitor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepoResult<Vec<Heartbeat>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM heartbeats
            WHERE monitor_id = ? AND time >= ? AND time < ?
            ORDER BY time ASC
            "#,
        )
        .bind(monitor_id)
        .bind(Self::millis(&since))
        .bind(Self::millis(&until))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_heartbeat).collect()
    }
}

#[async_trait]
impl MonitorRepository for SqliteStore {
    async fn create(&self, mut monitor: Monitor) -> RepoResult<Monitor> {
        if monitor.id.is_empty() {
            monitor.id = uuid::Uuid::new_v4().to_string();
        }
        sqlx::query(
            r#"
            INSERT INTO monitors (
                id, name, kind, interval_secs, timeout_secs, max_retries,
                retry_interval_secs, resend_interval, active, status,
                proxy_id, push_token, config, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&monitor.id)
        .bind(&monitor.name)
        .bind(Self::enum_str(&monitor.kind)?)
        .bind(monitor.interval_secs as i64)
        .bind(monitor.timeout_secs as i64)
        .bind(monitor.max_retries as i64)
        .bind(monitor.retry_interval_secs as i64)
        .bind(monitor.resend_interval as i64)
        .bind(monitor.active)
        .bind(Self::enum_str(&monitor.status)?)
        .bind(&monitor.proxy_id)
        .bind(&monitor.push_token)
        .bind(&monitor.config)
        .bind(Self::millis(&monitor.created_at))
        .bind(Self::millis(&monitor.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(monitor)
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Monitor>> {
        let row = sqlx::query("SELECT * FROM monitors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_monitor).transpose()
    }

    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<Monitor>> {
        let mut sql = String::from("SELECT * FROM monitors WHERE 1 = 1");
        if query.active.is_some() {
            sql.push_str(" AND active = ?");
        }
        if query.search.is_some() {
            sql.push_str(" AND name LIKE ?");
        }
        sql.push_str(" ORDER BY created_at ASC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        if let Some(active) = query.active {
            q = q.bind(active);
        }
        if let Some(search) = &query.search {
            q = q.bind(format!("%{search}%"));
        }
        q = q.bind(query.limit as i64).bind(query.offset() as i64);

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_monitor).collect()
    }

    async fn find_active(&self) -> RepoResult<Vec<Monitor>> {
        let rows = sqlx::query("SELECT * FROM monitors WHERE active = 1 ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_monitor).collect()
    }

    async fn find_by_push_token(&self, token: &str) -> RepoResult<Option<Monitor>> {
        let row = sqlx::query("SELECT * FROM monitors WHERE push_token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_monitor).transpose()
    }

    async fn update(&self, monitor: &Monitor) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE monitors SET
                name = ?, kind = ?, interval_secs = ?, timeout_secs = ?,
                max_retries = ?, retry_interval_secs = ?, resend_interval = ?,
                active = ?, status = ?, proxy_id = ?, push_token = ?,
                config = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&monitor.name)
        .bind(Self::enum_str(&monitor.kind)?)
        .bind(monitor.interval_secs as i64)
        .bind(monitor.timeout_secs as i64)
        .bind(monitor.max_retries as i64)
        .bind(monitor.retry_interval_secs as i64)
        .bind(monitor.resend_interval as i64)
        .bind(monitor.active)
        .bind(Self::enum_str(&monitor.status)?)
        .bind(&monitor.proxy_id)
        .bind(&monitor.push_token)
        .bind(&monitor.config)
        .bind(Self::millis(&Utc::now()))
        .bind(&monitor.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("monitor {}", monitor.id)));
        }
        Ok(())
    }

    async fn update_status(&self, id: &str, status: MonitorStatus) -> RepoResult<()> {
        let result = sqlx::query("UPDATE monitors SET status = ?, updated_at = ? WHERE id = ?")
            .bind(Self::enum_str(&status)?)
            .bind(Self::millis(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("monitor {id}")));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM monitors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("monitor {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl HeartbeatRepository for SqliteStore {
    async fn create(&self, mut heartbeat: Heartbeat) -> RepoResult<Heartbeat> {
        if heartbeat.id.is_empty() {
            heartbeat.id = uuid::Uuid::new_v4().to_string();
        }
        sqlx::query(
            r#"
            INSERT INTO heartbeats (
                id, monitor_id, status, msg, ping_ms, duration_ms,
                down_count, retries, important, time, end_time, notified
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&heartbeat.id)
        .bind(&heartbeat.monitor_id)
        .bind(Self::enum_str(&heartbeat.status)?)
        .bind(&heartbeat.msg)
        .bind(heartbeat.ping_ms as i64)
        .bind(heartbeat.duration_ms as i64)
        .bind(heartbeat.down_count as i64)
        .bind(heartbeat.retries as i64)
        .bind(heartbeat.important)
        .bind(Self::millis(&heartbeat.time))
        .bind(Self::millis(&heartbeat.end_time))
        .bind(heartbeat.notified)
        .execute(&self.pool)
        .await?;

        Ok(heartbeat)
    }

    async fn find_last_n(&self, monitor_id: &str, n: usize) -> RepoResult<Vec<Heartbeat>> {
        let rows = sqlx::query(
            "SELECT * FROM heartbeats WHERE monitor_id = ? ORDER BY time DESC LIMIT ?",
        )
        .bind(monitor_id)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_heartbeat).collect()
    }

    async fn find_by_monitor_paginated(
        &self,
        monitor_id: &str,
        page: u64,
        limit: u64,
    ) -> RepoResult<Vec<Heartbeat>> {
        let offset = page.saturating_sub(1) * limit;
        let rows = sqlx::query(
            "SELECT * FROM heartbeats WHERE monitor_id = ? ORDER BY time DESC LIMIT ? OFFSET ?",
        )
        .bind(monitor_id)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_heartbeat).collect()
    }

    async fn find_range_chart_points(
        &self,
        monitor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepoResult<Vec<ChartPoint>> {
        // Bucketing happens in shared code so both backends agree exactly.
        let beats = self.beats_in_range(monitor_id, since, until).await?;
        Ok(chart_points_from_beats(&beats, since, until))
    }

    async fn find_uptime_stats(
        &self,
        monitor_id: &str,
        periods: &[UptimePeriod],
        now: DateTime<Utc>,
    ) -> RepoResult<HashMap<String, f64>> {
        let mut stats = HashMap::new();
        for period in periods {
            let since = now - period.window;
            let rows = sqlx::query(
                r#"
                SELECT status, COUNT(*) AS n FROM heartbeats
                WHERE monitor_id = ? AND time >= ? AND time <= ?
                GROUP BY status
                "#,
            )
            .bind(monitor_id)
            .bind(Self::millis(&since))
            .bind(Self::millis(&now))
            .fetch_all(&self.pool)
            .await?;

            let mut up = 0i64;
            let mut down = 0i64;
            for row in rows {
                let status: String = row.get("status");
                let n: i64 = row.get("n");
                match status.as_str() {
                    "up" => up += n,
                    "down" | "pending" => down += n,
                    _ => {}
                }
            }
            let percent = if up + down == 0 {
                100.0
            } else {
                up as f64 / (up + down) as f64 * 100.0
            };
            stats.insert(period.label.clone(), percent);
        }
        Ok(stats)
    }

    async fn set_notified(&self, id: &str) -> RepoResult<()> {
        let result = sqlx::query("UPDATE heartbeats SET notified = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("heartbeat {id}")));
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM heartbeats WHERE time < ?")
            .bind(Self::millis(&cutoff))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_by_monitor(&self, monitor_id: &str) -> RepoResult<u64> {
        let result = sqlx::query("DELETE FROM heartbeats WHERE monitor_id = ?")
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MaintenanceRepository for SqliteStore {
    async fn create(&self, mut maintenance: Maintenance) -> RepoResult<Maintenance> {
        if maintenance.id.is_empty() {
            maintenance.id = uuid::Uuid::new_v4().to_string();
        }
        let definition = serde_json::to_string(&maintenance)?;
        sqlx::query(
            "INSERT INTO maintenances (id, title, active, definition) VALUES (?, ?, ?, ?)",
        )
        .bind(&maintenance.id)
        .bind(&maintenance.title)
        .bind(maintenance.active)
        .bind(definition)
        .execute(&self.pool)
        .await?;
        Ok(maintenance)
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Maintenance>> {
        let row = sqlx::query("SELECT definition FROM maintenances WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let definition: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition)?))
            }
            None => Ok(None),
        }
    }

    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<Maintenance>> {
        let mut sql = String::from("SELECT definition FROM maintenances WHERE 1 = 1");
        if query.active.is_some() {
            sql.push_str(" AND active = ?");
        }
        sql.push_str(" ORDER BY id ASC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        if let Some(active) = query.active {
            q = q.bind(active);
        }
        q = q.bind(query.limit as i64).bind(query.offset() as i64);

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let definition: String = row.get("definition");
                serde_json::from_str(&definition).map_err(Into::into)
            })
            .collect()
    }

    async fn update(&self, maintenance: &Maintenance) -> RepoResult<()> {
        let definition = serde_json::to_string(maintenance)?;
        let result = sqlx::query(
            "UPDATE maintenances SET title = ?, active = ?, definition = ? WHERE id = ?",
        )
        .bind(&maintenance.title)
        .bind(maintenance.active)
        .bind(definition)
        .bind(&maintenance.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("maintenance {}", maintenance.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM monitor_maintenance WHERE maintenance_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM maintenances WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("maintenance {id}")));
        }
        Ok(())
    }

    async fn find_for_monitor(&self, monitor_id: &str) -> RepoResult<Vec<Maintenance>> {
        let rows = sqlx::query(
            r#"
            SELECT m.definition FROM maintenances m
            JOIN monitor_maintenance mm ON mm.maintenance_id = m.id
            WHERE mm.monitor_id = ?
            "#,
        )
        .bind(monitor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let definition: String = row.get("definition");
                serde_json::from_str(&definition).map_err(Into::into)
            })
            .collect()
    }

    async fn link_monitor(&self, maintenance_id: &str, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("INSERT INTO monitor_maintenance (maintenance_id, monitor_id) VALUES (?, ?)")
            .bind(maintenance_id)
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unlink_monitor(&self, maintenance_id: &str, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM monitor_maintenance WHERE maintenance_id = ? AND monitor_id = ?")
            .bind(maintenance_id)
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM monitor_maintenance WHERE monitor_id = ?")
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationChannelRepository for SqliteStore {
    async fn create(&self, mut channel: NotificationChannel) -> RepoResult<NotificationChannel> {
        if channel.id.is_empty() {
            channel.id = uuid::Uuid::new_v4().to_string();
        }
        sqlx::query(
            "INSERT INTO notification_channels (id, name, kind, config, active) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&channel.id)
        .bind(&channel.name)
        .bind(Self::enum_str(&channel.kind)?)
        .bind(&channel.config)
        .bind(channel.active)
        .execute(&self.pool)
        .await?;
        Ok(channel)
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<NotificationChannel>> {
        let row = sqlx::query("SELECT * FROM notification_channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(NotificationChannel {
                id: row.get("id"),
                name: row.get("name"),
                kind: Self::enum_from_str::<ChannelKind>(&row.get::<String, _>("kind"))?,
                config: row.get("config"),
                active: row.get("active"),
            })
        })
        .transpose()
    }

    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<NotificationChannel>> {
        let mut sql = String::from("SELECT * FROM notification_channels WHERE 1 = 1");
        if query.active.is_some() {
            sql.push_str(" AND active = ?");
        }
        sql.push_str(" ORDER BY id ASC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        if let Some(active) = query.active {
            q = q.bind(active);
        }
        q = q.bind(query.limit as i64).bind(query.offset() as i64);

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter()
            .map(|row| {
                Ok(NotificationChannel {
                    id: row.get("id"),
                    name: row.get("name"),
                    kind: Self::enum_from_str::<ChannelKind>(&row.get::<String, _>("kind"))?,
                    config: row.get("config"),
                    active: row.get("active"),
                })
            })
            .collect()
    }

    async fn update(&self, channel: &NotificationChannel) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE notification_channels SET name = ?, kind = ?, config = ?, active = ? WHERE id = ?",
        )
        .bind(&channel.name)
        .bind(Self::enum_str(&channel.kind)?)
        .bind(&channel.config)
        .bind(channel.active)
        .bind(&channel.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("channel {}", channel.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM monitor_notification WHERE channel_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let result = sqlx::query("DELETE FROM notification_channels WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("channel {id}")));
        }
        Ok(())
    }

    async fn find_for_monitor(&self, monitor_id: &str) -> RepoResult<Vec<NotificationChannel>> {
        let rows = sqlx::query(
            r#"
            SELECT c.* FROM notification_channels c
            JOIN monitor_notification mn ON mn.channel_id = c.id
            WHERE mn.monitor_id = ?
            "#,
        )
        .bind(monitor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(NotificationChannel {
                    id: row.get("id"),
                    name: row.get("name"),
                    kind: Self::enum_from_str::<ChannelKind>(&row.get::<String, _>("kind"))?,
                    config: row.get("config"),
                    active: row.get("active"),
                })
            })
            .collect()
    }

    async fn link_monitor(&self, channel_id: &str, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("INSERT INTO monitor_notification (channel_id, monitor_id) VALUES (?, ?)")
            .bind(channel_id)
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unlink_monitor(&self, channel_id: &str, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM monitor_notification WHERE channel_id = ? AND monitor_id = ?")
            .bind(channel_id)
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM monitor_notification WHERE monitor_id = ?")
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProxyRepository for SqliteStore {
    async fn create(&self, mut proxy: Proxy) -> RepoResult<Proxy> {
        if proxy.id.is_empty() {
            proxy.id = uuid::Uuid::new_v4().to_string();
        }
        sqlx::query(
            "INSERT INTO proxies (id, protocol, host, port, username, password, active) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&proxy.id)
        .bind(&proxy.protocol)
        .bind(&proxy.host)
        .bind(proxy.port as i64)
        .bind(&proxy.username)
        .bind(&proxy.password)
        .bind(proxy.active)
        .execute(&self.pool)
        .await?;
        Ok(proxy)
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Proxy>> {
        let row = sqlx::query("SELECT * FROM proxies WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Proxy {
            id: row.get("id"),
            protocol: row.get("protocol"),
            host: row.get("host"),
            port: row.get::<i64, _>("port") as u16,
            username: row.get("username"),
            password: row.get("password"),
            active: row.get("active"),
        }))
    }

    async fn delete(&self, id: &str) -> RepoResult<()> {
        let result = sqlx::query("DELETE FROM proxies WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(format!("proxy {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusPageRepository for SqliteStore {
    async fn link_monitor(&self, status_page_id: &str, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("INSERT INTO monitor_status_page (status_page_id, monitor_id) VALUES (?, ?)")
            .bind(status_page_id)
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unlink_monitor(&self, status_page_id: &str, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM monitor_status_page WHERE status_page_id = ? AND monitor_id = ?")
            .bind(status_page_id)
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn monitors_for_page(&self, status_page_id: &str) -> RepoResult<Vec<String>> {
        let rows = sqlx::query("SELECT monitor_id FROM monitor_status_page WHERE status_page_id = ?")
            .bind(status_page_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("monitor_id")).collect())
    }

    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()> {
        sqlx::query("DELETE FROM monitor_status_page WHERE monitor_id = ?")
            .bind(monitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
