// mqspool daemon - exercises the message spool end to end
//
// Repairs the store, starts the housekeeper, and blocks until terminated.
// No MQTT transport is implemented here; the binary exists to wire the
// library's pieces together the way a real publisher would.

mod cli;

use anyhow::{Context, Result};
use cli::Cli;
use mqspool::{Housekeeper, HousekeeperConfig, Repository, SpoolConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_logging() {
    let default_filter = "mqspool=info,spoold=info";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse_and_apply();
    let config = cli.resolve_config();

    tracing::info!(
        database = %config.database_path.display(),
        capacity = config.capacity,
        house_keeper_interval_secs = config.house_keeper_interval_secs,
        "starting spool"
    );

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let repository = Arc::new(
        Repository::open(&config.database_path, config.pool_size, config.capacity)
            .context("failed to open spool")?,
    );

    let repaired = tokio::task::spawn_blocking({
        let repository = repository.clone();
        move || repository.repair()
    })
    .await
    .context("repair task panicked")??;
    if repaired > 0 {
        tracing::warn!("startup repair removed {repaired} corrupted row(s)");
    }

    let housekeeper = Housekeeper::start(
        repository.clone(),
        HousekeeperConfig {
            interval: Duration::from_secs(config.house_keeper_interval_secs),
            purge_age_secs: config.purge_age_secs,
            wal_checkpoint_enabled: config.wal_checkpoint_enabled,
        },
    );

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, stopping housekeeper");
    housekeeper.stop();

    Ok(())
}
