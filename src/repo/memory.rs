//! In-memory repository backend (no persistence)
//!
//! Keeps every entity in maps behind an async RwLock. Useful for running
//! without a database and as the backing store for the test suite. All data
//! is lost on restart.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::model::{
    ChartPoint, Heartbeat, Maintenance, Monitor, MonitorStatus, NotificationChannel, Proxy,
};

use super::error::{RepoError, RepoResult};
use super::{
    HeartbeatRepository, ListQuery, MaintenanceRepository, MonitorRepository,
    NotificationChannelRepository, ProxyRepository, StatusPageRepository, UptimePeriod,
    chart_points_from_beats, uptime_percent_from_beats,
};

#[derive(Default)]
struct State {
    monitors: HashMap<String, Monitor>,
    heartbeats: HashMap<String, Vec<Heartbeat>>,
    maintenances: HashMap<String, Maintenance>,
    channels: HashMap<String, NotificationChannel>,
    proxies: HashMap<String, Proxy>,
    monitor_maintenance: HashSet<(String, String)>,
    monitor_notification: HashSet<(String, String)>,
    monitor_status_page: HashSet<(String, String)>,
}

/// In-memory store implementing every repository trait.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_id(id: &mut String) {
        if id.is_empty() {
            *id = uuid::Uuid::new_v4().to_string();
        }
    }
}

#[async_trait]
impl MonitorRepository for MemoryStore {
    async fn create(&self, mut monitor: Monitor) -> RepoResult<Monitor> {
        Self::ensure_id(&mut monitor.id);
        let mut state = self.state.write().await;
        if state.monitors.contains_key(&monitor.id) {
            return Err(RepoError::Conflict(format!(
                "monitor {} already exists",
                monitor.id
            )));
        }
        state.monitors.insert(monitor.id.clone(), monitor.clone());
        Ok(monitor)
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Monitor>> {
        Ok(self.state.read().await.monitors.get(id).cloned())
    }

    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<Monitor>> {
        let state = self.state.read().await;
        let mut monitors: Vec<_> = state
            .monitors
            .values()
            .filter(|m| query.active.is_none_or(|a| m.active == a))
            .filter(|m| {
                query
                    .search
                    .as_deref()
                    .is_none_or(|s| m.name.to_lowercase().contains(&s.to_lowercase()))
            })
            .cloned()
            .collect();
        monitors.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(monitors
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn find_active(&self) -> RepoResult<Vec<Monitor>> {
        let state = self.state.read().await;
        let mut monitors: Vec<_> = state.monitors.values().filter(|m| m.active).cloned().collect();
        monitors.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(monitors)
    }

    async fn find_by_push_token(&self, token: &str) -> RepoResult<Option<Monitor>> {
        let state = self.state.read().await;
        Ok(state
            .monitors
            .values()
            .find(|m| m.push_token.as_deref() == Some(token))
            .cloned())
    }

    async fn update(&self, monitor: &Monitor) -> RepoResult<()> {
        let mut state = self.state.write().await;
        match state.monitors.get_mut(&monitor.id) {
            Some(existing) => {
                *existing = monitor.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound(format!("monitor {}", monitor.id))),
        }
    }

    async fn update_status(&self, id: &str, status: MonitorStatus) -> RepoResult<()> {
        let mut state = self.state.write().await;
        match state.monitors.get_mut(id) {
            Some(existing) => {
                existing.status = status;
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(RepoError::NotFound(format!("monitor {id}"))),
        }
    }

    async fn delete(&self, id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state
            .monitors
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepoError::NotFound(format!("monitor {id}")))
    }
}

#[async_trait]
impl HeartbeatRepository for MemoryStore {
    async fn create(&self, mut heartbeat: Heartbeat) -> RepoResult<Heartbeat> {
        Self::ensure_id(&mut heartbeat.id);
        let mut state = self.state.write().await;
        state
            .heartbeats
            .entry(heartbeat.monitor_id.clone())
            .or_default()
            .push(heartbeat.clone());
        Ok(heartbeat)
    }

    async fn find_last_n(&self, monitor_id: &str, n: usize) -> RepoResult<Vec<Heartbeat>> {
        let state = self.state.read().await;
        Ok(state
            .heartbeats
            .get(monitor_id)
            .map(|beats| beats.iter().rev().take(n).cloned().collect())
            .unwrap_or_default())
    }

    async fn find_by_monitor_paginated(
        &self,
        monitor_id: &str,
        page: u64,
        limit: u64,
    ) -> RepoResult<Vec<Heartbeat>> {
        let offset = page.saturating_sub(1) * limit;
        let state = self.state.read().await;
        Ok(state
            .heartbeats
            .get(monitor_id)
            .map(|beats| {
                beats
                    .iter()
                    .rev()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_range_chart_points(
        &self,
        monitor_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RepoResult<Vec<ChartPoint>> {
        let state = self.state.read().await;
        let beats = state.heartbeats.get(monitor_id).cloned().unwrap_or_default();
        Ok(chart_points_from_beats(&beats, since, until))
    }

    async fn find_uptime_stats(
        &self,
        monitor_id: &str,
        periods: &[UptimePeriod],
        now: DateTime<Utc>,
    ) -> RepoResult<HashMap<String, f64>> {
        let state = self.state.read().await;
        let beats = state.heartbeats.get(monitor_id).cloned().unwrap_or_default();

        let mut stats = HashMap::new();
        for period in periods {
            let since = now - period.window;
            let in_range: Vec<_> = beats
                .iter()
                .filter(|b| b.time >= since && b.time <= now)
                .cloned()
                .collect();
            stats.insert(period.label.clone(), uptime_percent_from_beats(&in_range));
        }
        Ok(stats)
    }

    async fn set_notified(&self, id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        for beats in state.heartbeats.values_mut() {
            if let Some(beat) = beats.iter_mut().find(|b| b.id == id) {
                beat.notified = true;
                return Ok(());
            }
        }
        Err(RepoError::NotFound(format!("heartbeat {id}")))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> RepoResult<u64> {
        let mut state = self.state.write().await;
        let mut deleted = 0u64;
        for beats in state.heartbeats.values_mut() {
            let before = beats.len();
            beats.retain(|b| b.time >= cutoff);
            deleted += (before - beats.len()) as u64;
        }
        Ok(deleted)
    }

    async fn delete_by_monitor(&self, monitor_id: &str) -> RepoResult<u64> {
        let mut state = self.state.write().await;
        Ok(state
            .heartbeats
            .remove(monitor_id)
            .map(|beats| beats.len() as u64)
            .unwrap_or(0))
    }
}

#[async_trait]
impl MaintenanceRepository for MemoryStore {
    async fn create(&self, mut maintenance: Maintenance) -> RepoResult<Maintenance> {
        Self::ensure_id(&mut maintenance.id);
        let mut state = self.state.write().await;
        if state.maintenances.contains_key(&maintenance.id) {
            return Err(RepoError::Conflict(format!(
                "maintenance {} already exists",
                maintenance.id
            )));
        }
        state
            .maintenances
            .insert(maintenance.id.clone(), maintenance.clone());
        Ok(maintenance)
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Maintenance>> {
        Ok(self.state.read().await.maintenances.get(id).cloned())
    }

    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<Maintenance>> {
        let state = self.state.read().await;
        let mut all: Vec<_> = state
            .maintenances
            .values()
            .filter(|m| query.active.is_none_or(|a| m.active == a))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn update(&self, maintenance: &Maintenance) -> RepoResult<()> {
        let mut state = self.state.write().await;
        match state.maintenances.get_mut(&maintenance.id) {
            Some(existing) => {
                *existing = maintenance.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound(format!("maintenance {}", maintenance.id))),
        }
    }

    async fn delete(&self, id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state.monitor_maintenance.retain(|(mid, _)| mid != id);
        state
            .maintenances
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepoError::NotFound(format!("maintenance {id}")))
    }

    async fn find_for_monitor(&self, monitor_id: &str) -> RepoResult<Vec<Maintenance>> {
        let state = self.state.read().await;
        Ok(state
            .monitor_maintenance
            .iter()
            .filter(|(_, mon)| mon == monitor_id)
            .filter_map(|(maint, _)| state.maintenances.get(maint))
            .cloned()
            .collect())
    }

    async fn link_monitor(&self, maintenance_id: &str, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let pair = (maintenance_id.to_string(), monitor_id.to_string());
        if !state.monitor_maintenance.insert(pair) {
            return Err(RepoError::Conflict(format!(
                "monitor {monitor_id} already linked to maintenance {maintenance_id}"
            )));
        }
        Ok(())
    }

    async fn unlink_monitor(&self, maintenance_id: &str, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state
            .monitor_maintenance
            .remove(&(maintenance_id.to_string(), monitor_id.to_string()));
        Ok(())
    }

    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state.monitor_maintenance.retain(|(_, mon)| mon != monitor_id);
        Ok(())
    }
}

#[async_trait]
impl NotificationChannelRepository for MemoryStore {
    async fn create(&self, mut channel: NotificationChannel) -> RepoResult<NotificationChannel> {
        Self::ensure_id(&mut channel.id);
        let mut state = self.state.write().await;
        if state.channels.contains_key(&channel.id) {
            return Err(RepoError::Conflict(format!(
                "channel {} already exists",
                channel.id
            )));
        }
        state.channels.insert(channel.id.clone(), channel.clone());
        Ok(channel)
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<NotificationChannel>> {
        Ok(self.state.read().await.channels.get(id).cloned())
    }

    async fn find_all(&self, query: ListQuery) -> RepoResult<Vec<NotificationChannel>> {
        let state = self.state.read().await;
        let mut all: Vec<_> = state
            .channels
            .values()
            .filter(|c| query.active.is_none_or(|a| c.active == a))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn update(&self, channel: &NotificationChannel) -> RepoResult<()> {
        let mut state = self.state.write().await;
        match state.channels.get_mut(&channel.id) {
            Some(existing) => {
                *existing = channel.clone();
                Ok(())
            }
            None => Err(RepoError::NotFound(format!("channel {}", channel.id))),
        }
    }

    async fn delete(&self, id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state.monitor_notification.retain(|(cid, _)| cid != id);
        state
            .channels
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepoError::NotFound(format!("channel {id}")))
    }

    async fn find_for_monitor(&self, monitor_id: &str) -> RepoResult<Vec<NotificationChannel>> {
        let state = self.state.read().await;
        Ok(state
            .monitor_notification
            .iter()
            .filter(|(_, mon)| mon == monitor_id)
            .filter_map(|(chan, _)| state.channels.get(chan))
            .cloned()
            .collect())
    }

    async fn link_monitor(&self, channel_id: &str, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let pair = (channel_id.to_string(), monitor_id.to_string());
        if !state.monitor_notification.insert(pair) {
            return Err(RepoError::Conflict(format!(
                "monitor {monitor_id} already linked to channel {channel_id}"
            )));
        }
        Ok(())
    }

    async fn unlink_monitor(&self, channel_id: &str, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state
            .monitor_notification
            .remove(&(channel_id.to_string(), monitor_id.to_string()));
        Ok(())
    }

    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state.monitor_notification.retain(|(_, mon)| mon != monitor_id);
        Ok(())
    }
}

#[async_trait]
impl ProxyRepository for MemoryStore {
    async fn create(&self, mut proxy: Proxy) -> RepoResult<Proxy> {
        Self::ensure_id(&mut proxy.id);
        let mut state = self.state.write().await;
        state.proxies.insert(proxy.id.clone(), proxy.clone());
        Ok(proxy)
    }

    async fn find_by_id(&self, id: &str) -> RepoResult<Option<Proxy>> {
        Ok(self.state.read().await.proxies.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state
            .proxies
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RepoError::NotFound(format!("proxy {id}")))
    }
}

#[async_trait]
impl StatusPageRepository for MemoryStore {
    async fn link_monitor(&self, status_page_id: &str, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        let pair = (status_page_id.to_string(), monitor_id.to_string());
        if !state.monitor_status_page.insert(pair) {
            return Err(RepoError::Conflict(format!(
                "monitor {monitor_id} already linked to status page {status_page_id}"
            )));
        }
        Ok(())
    }

    async fn unlink_monitor(&self, status_page_id: &str, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state
            .monitor_status_page
            .remove(&(status_page_id.to_string(), monitor_id.to_string()));
        Ok(())
    }

    async fn monitors_for_page(&self, status_page_id: &str) -> RepoResult<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .monitor_status_page
            .iter()
            .filter(|(page, _)| page == status_page_id)
            .map(|(_, mon)| mon.clone())
            .collect())
    }

    async fn unlink_all_for_monitor(&self, monitor_id: &str) -> RepoResult<()> {
        let mut state = self.state.write().await;
        state.monitor_status_page.retain(|(_, mon)| mon != monitor_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MonitorKind;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_monitor_crud() {
        let store = MemoryStore::new();
        let monitor = Monitor::new("web", MonitorKind::Http, "{}");
        let created = MonitorRepository::create(&store, monitor).await.unwrap();

        let found = MonitorRepository::find_by_id(&store, &created.id).await.unwrap().unwrap();
        assert_eq!(found.name, "web");

        store
            .update_status(&created.id, MonitorStatus::Down)
            .await
            .unwrap();
        let found = MonitorRepository::find_by_id(&store, &created.id).await.unwrap().unwrap();
        assert_eq!(found.status, MonitorStatus::Down);

        MonitorRepository::delete(&store, &created.id).await.unwrap();
        assert!(MonitorRepository::find_by_id(&store, &created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_push_token() {
        let store = MemoryStore::new();
        let mut monitor = Monitor::new("pusher", MonitorKind::Push, "{}");
        monitor.push_token = Some("tok_abc".to_string());
        MonitorRepository::create(&store, monitor).await.unwrap();

        let found = store.find_by_push_token("tok_abc").await.unwrap();
        assert!(found.is_some());
        assert!(store.find_by_push_token("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_heartbeats_last_n_newest_first() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut hb = Heartbeat::new(
                "m1",
                MonitorStatus::Up,
                Utc::now() + chrono::Duration::seconds(i),
            );
            hb.ping_ms = i as u32;
            HeartbeatRepository::create(&store, hb).await.unwrap();
        }

        let last = store.find_last_n("m1", 2).await.unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].ping_ms, 4);
        assert_eq!(last[1].ping_ms, 3);
    }

    #[tokio::test]
    async fn test_link_pairs_are_unique() {
        let store = MemoryStore::new();
        MaintenanceRepository::link_monitor(&store, "maint1", "m1")
            .await
            .unwrap();
        let dup = MaintenanceRepository::link_monitor(&store, "maint1", "m1").await;
        assert_matches!(dup, Err(RepoError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_delete_older_than_is_idempotent() {
        let store = MemoryStore::new();
        let old = Heartbeat::new(
            "m1",
            MonitorStatus::Up,
            Utc::now() - chrono::Duration::days(30),
        );
        let fresh = Heartbeat::new("m1", MonitorStatus::Up, Utc::now());
        HeartbeatRepository::create(&store, old).await.unwrap();
        HeartbeatRepository::create(&store, fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(7);
        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 1);
        assert_eq!(store.delete_older_than(cutoff).await.unwrap(), 0);
    }
}
