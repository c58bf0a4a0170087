//! Clock and timezone service.
//!
//! The core works in UTC everywhere; conversions only happen where a
//! maintenance window needs wall-clock semantics. The "server" zone is
//! configured once at startup; `SAME_AS_SERVER` (and the empty string)
//! resolve to it, `UTC` to UTC, anything else is parsed as an IANA name.
//! Unresolvable names degrade to UTC with a warning instead of failing the
//! caller.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

pub const SAME_AS_SERVER: &str = "SAME_AS_SERVER";

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    server_tz: Tz,
}

impl Default for Clock {
    fn default() -> Self {
        Self { server_tz: Tz::UTC }
    }
}

impl Clock {
    /// Build a clock whose server zone is parsed from `tz` (IANA name or
    /// `"UTC"`). Invalid names degrade to UTC.
    pub fn new(tz: &str) -> Self {
        let server_tz = match tz.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!("unknown server timezone {tz:?}, falling back to UTC");
                Tz::UTC
            }
        };
        Self { server_tz }
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn server_tz(&self) -> Tz {
        self.server_tz
    }

    /// Resolve a zone name as stored on maintenance records.
    pub fn resolve_zone(&self, tz: &str) -> Tz {
        let trimmed = tz.trim();
        if trimmed.is_empty() || trimmed == SAME_AS_SERVER {
            return self.server_tz;
        }
        match trimmed.parse::<Tz>() {
            Ok(tz) => tz,
            Err(_) => {
                warn!("unknown timezone {trimmed:?}, falling back to UTC");
                Tz::UTC
            }
        }
    }

    /// Convert a UTC instant into the named zone.
    pub fn to_zone(&self, t: DateTime<Utc>, tz: &str) -> DateTime<Tz> {
        t.with_timezone(&self.resolve_zone(tz))
    }
}
