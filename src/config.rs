//! Process configuration for the server binary.

use std::path::PathBuf;

use tracing::trace;

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (heartbeats older than this are purged)
        #[serde(default = "default_retention_days")]
        retention_days: u32,

        /// Cleanup interval in hours (how often the retention job runs)
        #[serde(default = "default_cleanup_interval_hours")]
        cleanup_interval_hours: u32,
    },
}

impl StorageConfig {
    /// Validate storage configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::None => Ok(()),
            StorageConfig::Sqlite {
                retention_days,
                cleanup_interval_hours,
                ..
            } => {
                if *retention_days < 1 {
                    return Err("retention_days must be at least 1".to_string());
                }
                if *retention_days > 3650 {
                    return Err("retention_days cannot exceed 3650 (10 years)".to_string());
                }

                if *cleanup_interval_hours < 1 {
                    return Err("cleanup_interval_hours must be at least 1".to_string());
                }
                if *cleanup_interval_hours > 720 {
                    return Err("cleanup_interval_hours cannot exceed 720 (30 days)".to_string());
                }

                let retention_hours = *retention_days as u64 * 24;
                if (*cleanup_interval_hours as u64) > retention_hours {
                    tracing::warn!(
                        "cleanup_interval_hours ({}) is longer than the retention period ({} hours). \
                         Old heartbeats may accumulate.",
                        cleanup_interval_hours,
                        retention_hours
                    );
                }

                Ok(())
            }
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./vigilia.db")
}

fn default_retention_days() -> u32 {
    180
}

fn default_cleanup_interval_hours() -> u32 {
    24 // Run cleanup once per day by default
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    /// Server timezone (IANA name); `SAME_AS_SERVER` on maintenance
    /// records resolves to this. Defaults to UTC.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Storage configuration (optional, defaults to SQLite)
    pub storage: Option<StorageConfig>,

    /// Event bus queue capacity per subscriber
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_bus_capacity() -> usize {
    256
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.bus_capacity < 1 {
            return Err("bus_capacity must be at least 1".to_string());
        }
        if let Some(storage) = &self.storage {
            storage.validate()?;
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file: {e}"))
        .inspect(|config: &Config| trace!("loaded config: {config:?}"))
}
