// CLI module - command-line argument parsing for the spool daemon
//
// Flags override the config file, which overrides the built-in defaults
// (see `mqspool::SpoolConfig::from_env`).

use clap::Parser;
use mqspool::SpoolConfig;
use std::path::PathBuf;

/// mqspool daemon - durable message spool for an MQTT-style publisher
#[derive(Parser)]
#[command(name = "spoold")]
#[command(version, about = "Durable message spool daemon", long_about = None)]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Soft cap on row count (applies to priority >= 2)
    #[arg(long)]
    capacity: Option<u64>,

    /// Housekeeper tick period, in seconds
    #[arg(long)]
    house_keeper_interval_secs: Option<u64>,

    /// Purge horizon for terminal-state rows, in seconds
    #[arg(long)]
    purge_age_secs: Option<i64>,
}

impl Cli {
    pub fn parse_and_apply() -> Self {
        Self::parse()
    }

    /// Layer CLI flags on top of `SpoolConfig::from_env()`.
    pub fn resolve_config(&self) -> SpoolConfig {
        let mut config = SpoolConfig::from_env();

        if let Some(v) = &self.database_path {
            config.database_path = v.clone();
        }
        if let Some(v) = self.capacity {
            config.capacity = v;
        }
        if let Some(v) = self.house_keeper_interval_secs {
            config.house_keeper_interval_secs = v;
        }
        if let Some(v) = self.purge_age_secs {
            config.purge_age_secs = v;
        }

        config
    }
}
