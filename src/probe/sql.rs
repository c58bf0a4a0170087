//! SQL database probes (PostgreSQL, MySQL, MariaDB)
//!
//! Connects with a single-connection pool, runs the configured query
//! (default `SELECT 1`), and optionally asserts a JSON-path value against
//! the first row rendered as JSON.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{Column, Row};

use crate::model::MonitorKind;

use super::{Probe, ProbeContext, ProbeResult, assert_json_payload};

#[derive(Debug, Deserialize)]
struct SqlConfig {
    connection_string: String,

    #[serde(default)]
    query: Option<String>,

    #[serde(default)]
    json_path: Option<String>,
    #[serde(default)]
    expected_value: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum SqlFlavor {
    Postgres,
    Mysql,
    Mariadb,
}

pub struct SqlProbe {
    flavor: SqlFlavor,
}

impl SqlProbe {
    pub fn postgres() -> Self {
        Self {
            flavor: SqlFlavor::Postgres,
        }
    }

    pub fn mysql() -> Self {
        Self {
            flavor: SqlFlavor::Mysql,
        }
    }

    /// MariaDB speaks the MySQL protocol; only the registry kind differs.
    pub fn mariadb() -> Self {
        Self {
            flavor: SqlFlavor::Mariadb,
        }
    }
}

/// Render the first row as a JSON object keyed by column name, so that the
/// shared JSON-path assertion applies to SQL results too. Values come back
/// as strings where the driver allows it.
fn pg_row_to_json(row: &sqlx::postgres::PgRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value: serde_json::Value = match row.try_get::<String, _>(i) {
            Ok(s) => serde_json::Value::String(s),
            Err(_) => match row.try_get::<i64, _>(i) {
                Ok(n) => serde_json::Value::from(n),
                Err(_) => match row.try_get::<f64, _>(i) {
                    Ok(f) => serde_json::Value::from(f),
                    Err(_) => match row.try_get::<bool, _>(i) {
                        Ok(b) => serde_json::Value::from(b),
                        Err(_) => serde_json::Value::Null,
                    },
                },
            },
        };
        map.insert(column.name().to_string(), value);
    }
    serde_json::Value::Object(map)
}

fn mysql_row_to_json(row: &sqlx::mysql::MySqlRow) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value: serde_json::Value = match row.try_get::<String, _>(i) {
            Ok(s) => serde_json::Value::String(s),
            Err(_) => match row.try_get::<i64, _>(i) {
                Ok(n) => serde_json::Value::from(n),
                Err(_) => match row.try_get::<f64, _>(i) {
                    Ok(f) => serde_json::Value::from(f),
                    Err(_) => match row.try_get::<bool, _>(i) {
                        Ok(b) => serde_json::Value::from(b),
                        Err(_) => serde_json::Value::Null,
                    },
                },
            },
        };
        map.insert(column.name().to_string(), value);
    }
    serde_json::Value::Object(map)
}

#[async_trait]
impl Probe for SqlProbe {
    fn kind(&self) -> MonitorKind {
        match self.flavor {
            SqlFlavor::Postgres => MonitorKind::Postgres,
            SqlFlavor::Mysql => MonitorKind::Mysql,
            SqlFlavor::Mariadb => MonitorKind::Mariadb,
        }
    }

    async fn execute(&self, ctx: ProbeContext<'_>) -> ProbeResult {
        let config: SqlConfig = match serde_json::from_str(&ctx.monitor.config) {
            Ok(config) => config,
            Err(e) => return ProbeResult::down(format!("invalid sql config: {e}")),
        };

        let query = config.query.as_deref().unwrap_or("SELECT 1");
        let start = Instant::now();

        let row_json = match self.flavor {
            SqlFlavor::Postgres => {
                let pool = match sqlx::postgres::PgPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(ctx.deadline)
                    .connect(&config.connection_string)
                    .await
                {
                    Ok(pool) => pool,
                    Err(e) => return ProbeResult::down(format!("postgres connect failed: {e}")),
                };
                let row = sqlx::query(query).fetch_optional(&pool).await;
                let result = match row {
                    Ok(row) => row.map(|r| pg_row_to_json(&r)),
                    Err(e) => {
                        pool.close().await;
                        return ProbeResult::down(format!("query failed: {e}"));
                    }
                };
                pool.close().await;
                result
            }
            SqlFlavor::Mysql | SqlFlavor::Mariadb => {
                let pool = match sqlx::mysql::MySqlPoolOptions::new()
                    .max_connections(1)
                    .acquire_timeout(ctx.deadline)
                    .connect(&config.connection_string)
                    .await
                {
                    Ok(pool) => pool,
                    Err(e) => return ProbeResult::down(format!("mysql connect failed: {e}")),
                };
                let row = sqlx::query(query).fetch_optional(&pool).await;
                let result = match row {
                    Ok(row) => row.map(|r| mysql_row_to_json(&r)),
                    Err(e) => {
                        pool.close().await;
                        return ProbeResult::down(format!("query failed: {e}"));
                    }
                };
                pool.close().await;
                result
            }
        };
        let ping_ms = start.elapsed().as_millis() as u32;

        if config.json_path.as_deref().is_some_and(|p| !p.is_empty()) {
            let Some(row_json) = row_json else {
                return ProbeResult::down("query returned no rows to assert against");
            };
            return match assert_json_payload(
                &row_json,
                config.json_path.as_deref(),
                config.expected_value.as_deref(),
            ) {
                Ok(found) => ProbeResult::up(format!("assertion matched: {found}"), ping_ms),
                Err(msg) => ProbeResult::down(msg),
            };
        }

        ProbeResult::up("query succeeded", ping_ms)
    }
}
