//! Configuration for the spool.
//!
//! Loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`~/.config/mqspool/config.toml`)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

/// Spool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SpoolConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum pooled connections.
    pub pool_size: u32,

    /// Period of the maintenance tick, in seconds.
    pub house_keeper_interval_secs: u64,

    /// Horizon for deleting dropped/confirmed/fire-and-forget rows, in seconds.
    pub purge_age_secs: i64,

    /// Soft cap on row count, enforced for priorities >= 2.
    pub capacity: u64,

    /// If false, the housekeeper also issues an explicit checkpoint every
    /// tick (mirrors "backend configured without write-ahead data logging").
    pub wal_checkpoint_enabled: bool,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/spool.db"),
            pool_size: 4,
            house_keeper_interval_secs: 60,
            purge_age_secs: 7 * 24 * 3600,
            capacity: 10_000,
            wal_checkpoint_enabled: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// File configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure (subset of `SpoolConfig` that makes sense to persist).
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    database_path: Option<String>,
    pool_size: Option<u32>,
    house_keeper_interval_secs: Option<u64>,
    purge_age_secs: Option<i64>,
    capacity: Option<u64>,
    wal_checkpoint_enabled: Option<bool>,
}

impl SpoolConfig {
    /// Config file path: `~/.config/mqspool/config.toml`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".config").join("mqspool").join("config.toml"))
    }

    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("failed to parse {}: {e}, using defaults", path.display());
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(),
        }
    }

    /// Load configuration, applying file overrides and then environment
    /// overrides on top of the built-in defaults.
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        let mut config = Self::default();

        if let Some(v) = file.database_path {
            config.database_path = PathBuf::from(v);
        }
        if let Some(v) = file.pool_size {
            config.pool_size = v;
        }
        if let Some(v) = file.house_keeper_interval_secs {
            config.house_keeper_interval_secs = v;
        }
        if let Some(v) = file.purge_age_secs {
            config.purge_age_secs = v;
        }
        if let Some(v) = file.capacity {
            config.capacity = v;
        }
        if let Some(v) = file.wal_checkpoint_enabled {
            config.wal_checkpoint_enabled = v;
        }

        if let Ok(v) = std::env::var("MQSPOOL_DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MQSPOOL_POOL_SIZE") {
            if let Ok(v) = v.parse() {
                config.pool_size = v;
            }
        }
        if let Ok(v) = std::env::var("MQSPOOL_HOUSEKEEPER_INTERVAL_SECS") {
            if let Ok(v) = v.parse() {
                config.house_keeper_interval_secs = v;
            }
        }
        if let Ok(v) = std::env::var("MQSPOOL_PURGE_AGE_SECS") {
            if let Ok(v) = v.parse() {
                config.purge_age_secs = v;
            }
        }
        if let Ok(v) = std::env::var("MQSPOOL_CAPACITY") {
            if let Ok(v) = v.parse() {
                config.capacity = v;
            }
        }
        if let Ok(v) = std::env::var("MQSPOOL_WAL_CHECKPOINT_ENABLED") {
            if let Ok(v) = v.parse() {
                config.wal_checkpoint_enabled = v;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SpoolConfig::default();
        assert!(config.capacity > 0);
        assert!(config.house_keeper_interval_secs > 0);
    }

    #[test]
    fn file_config_round_trips_through_toml() {
        let toml_str = r#"
            capacity = 500
            purge_age_secs = 3600
            wal_checkpoint_enabled = false
        "#;
        let file: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(file.capacity, Some(500));
        assert_eq!(file.purge_age_secs, Some(3600));
        assert_eq!(file.wal_checkpoint_enabled, Some(false));
        assert_eq!(file.pool_size, None);
    }
}
