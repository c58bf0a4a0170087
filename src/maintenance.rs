//! Maintenance window evaluator
//!
//! Decides whether a maintenance definition is active at a given instant.
//! All strategies are bounded by the effective `start_date_time` /
//! `end_date_time` pair: a window whose effective end has passed is ended
//! and never active again. Wall-clock strategies evaluate in the
//! maintenance's own timezone; `start_time > end_time` wraps the window
//! past midnight.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::model::{Maintenance, MaintenanceStrategy, MonthDay};
use crate::repo::{MaintenanceRepository, RepoResult};

/// Convert a standard 5-field Unix cron expression to the 7-field format
/// expected by the `cron` crate (seconds pinned to :00, any year).
fn to_cron_crate_format(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {} *", expression)
    } else {
        expression.to_string()
    }
}

/// Parse "HH:MM" or "HH:MM:SS".
fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .ok()
}

/// Membership in a `[start, end)` time-of-day window; `start > end` wraps
/// past midnight.
fn in_time_window(tod: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        tod >= start && tod < end
    } else {
        tod >= start || tod < end
    }
}

fn is_last_day_of_month(date: chrono::NaiveDate) -> bool {
    (date + Duration::days(1)).month() != date.month()
}

/// Evaluate one maintenance definition at `now`.
pub fn is_active(maintenance: &Maintenance, now: DateTime<Utc>, clock: &Clock) -> bool {
    if !maintenance.active {
        return false;
    }

    // Effective bounds apply to the whole strategy's validity.
    if let Some(end) = maintenance.end_date_time {
        if now > end {
            return false;
        }
    }
    if !matches!(maintenance.strategy, MaintenanceStrategy::Manual) {
        if let Some(start) = maintenance.start_date_time {
            if now < start {
                return false;
            }
        }
    }

    let tz: Tz = clock.resolve_zone(&maintenance.timezone);
    let local_now = now.with_timezone(&tz);

    match &maintenance.strategy {
        MaintenanceStrategy::Manual => true,

        MaintenanceStrategy::Single => {
            // Bounds were checked above; without both there is no window.
            maintenance.start_date_time.is_some() && maintenance.end_date_time.is_some()
        }

        MaintenanceStrategy::Cron {
            cron,
            duration_minutes,
        } => {
            let schedule = match Schedule::from_str(&to_cron_crate_format(cron)) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!("maintenance {}: invalid cron {cron:?}: {e}", maintenance.id);
                    return false;
                }
            };
            // The latest firing at or before now lies within the duration
            // exactly when some firing falls in (now - duration, now].
            let window_start = local_now - Duration::minutes(*duration_minutes as i64);
            schedule
                .after(&window_start)
                .next()
                .is_some_and(|firing| firing <= local_now)
        }

        MaintenanceStrategy::RecurringInterval {
            interval_days,
            start_time,
            end_time,
        } => {
            let (Some(start), Some(end)) =
                (parse_time_of_day(start_time), parse_time_of_day(end_time))
            else {
                warn!(
                    "maintenance {}: invalid time window {start_time:?}..{end_time:?}",
                    maintenance.id
                );
                return false;
            };
            let interval_days = (*interval_days).max(1) as i64;

            // Day index counts from the effective start's local date; the
            // Unix epoch anchors unbounded definitions deterministically.
            let anchor_date = maintenance
                .start_date_time
                .map(|s| s.with_timezone(&tz).date_naive())
                .unwrap_or(chrono::NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch"));
            let day_index = (local_now.date_naive() - anchor_date).num_days();
            if day_index < 0 {
                return false;
            }

            day_index % interval_days == 0 && in_time_window(local_now.time(), start, end)
        }

        MaintenanceStrategy::RecurringWeekday {
            weekdays,
            start_time,
            end_time,
        } => {
            let (Some(start), Some(end)) =
                (parse_time_of_day(start_time), parse_time_of_day(end_time))
            else {
                warn!(
                    "maintenance {}: invalid time window {start_time:?}..{end_time:?}",
                    maintenance.id
                );
                return false;
            };
            let weekday = local_now.weekday().num_days_from_sunday() as u8;
            weekdays.contains(&weekday) && in_time_window(local_now.time(), start, end)
        }

        MaintenanceStrategy::RecurringDayOfMonth {
            days_of_month,
            start_time,
            end_time,
        } => {
            let (Some(start), Some(end)) =
                (parse_time_of_day(start_time), parse_time_of_day(end_time))
            else {
                warn!(
                    "maintenance {}: invalid time window {start_time:?}..{end_time:?}",
                    maintenance.id
                );
                return false;
            };
            let today = local_now.date_naive();
            let day_matches = days_of_month.iter().any(|entry| match entry {
                MonthDay::Day(d) => *d as u32 == today.day(),
                MonthDay::Last => is_last_day_of_month(today),
            });
            day_matches && in_time_window(local_now.time(), start, end)
        }
    }
}

/// Joins maintenance definitions with monitor links and answers the only
/// question the runner asks: is this monitor inside any window right now?
#[derive(Clone)]
pub struct MaintenanceService {
    repo: Arc<dyn MaintenanceRepository>,
    clock: Clock,
}

impl MaintenanceService {
    pub fn new(repo: Arc<dyn MaintenanceRepository>, clock: Clock) -> Self {
        Self { repo, clock }
    }

    pub fn evaluate(&self, maintenance: &Maintenance, now: DateTime<Utc>) -> bool {
        is_active(maintenance, now, &self.clock)
    }

    /// True iff any enabled maintenance linked to the monitor is active.
    pub async fn active_for_monitor(
        &self,
        monitor_id: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let linked = self.repo.find_for_monitor(monitor_id).await?;
        for maintenance in &linked {
            if is_active(maintenance, now, &self.clock) {
                debug!(
                    "monitor {monitor_id} is under maintenance {:?}",
                    maintenance.title
                );
                return Ok(true);
            }
        }
        Ok(false)
    }
}
