//! Hearth game server.
//!
//! Wires the Game-ID bus to `PostgreSQL`, boots the registries and runs the
//! event scheduler until the process receives Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `HEARTH_CONFIG` or `hearth-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Connect to `PostgreSQL` and run migrations
//! 4. Register resolvers, effects and periodic types
//! 5. Spawn the event scheduler
//! 6. Wait for Ctrl-C, stop the scheduler after its current pass

mod boot;
mod error;

use std::path::PathBuf;
use std::sync::Arc;

use hearth_core::config::CoreConfig;
use hearth_db::{PgStore, PostgresConfig, PostgresPool};
use hearth_events::PeriodicRegistry;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::boot::Services;
use crate::error::ServerError;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "HEARTH_CONFIG";

/// Configuration file used when `HEARTH_CONFIG` is unset.
const DEFAULT_CONFIG_PATH: &str = "hearth-config.yaml";

/// Connections kept beyond one per batch worker.
const SPARE_CONNECTIONS: u32 = 4;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, config_path) = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("hearth-server starting");
    match &config_path {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Config file not found, using defaults"),
    }
    info!(
        poll_interval_ms = config.scheduler.poll_interval_ms,
        batch_workers = config.scheduler.batch_workers,
        max_listener_depth = config.dispatch.max_listener_depth,
        "Effective configuration"
    );

    let pool = connect(&config).await?;
    let store = Arc::new(PgStore::new(&pool, Handle::current()));

    let services = Services::build(store.clone(), store, PeriodicRegistry::new(), &config)?;
    let scheduler = Arc::new(services.scheduler(&config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

    tokio::signal::ctrl_c().await.map_err(ServerError::from)?;
    info!("Shutdown requested, waiting for the current pass");
    if shutdown_tx.send(true).is_err() {
        warn!("scheduler already stopped");
    }
    scheduler_task.await.map_err(ServerError::from)?;

    pool.close().await;
    info!("hearth-server shutdown complete");
    Ok(())
}

/// Load configuration from `HEARTH_CONFIG`, falling back to
/// `hearth-config.yaml` in the working directory and then to defaults.
fn load_config() -> Result<(CoreConfig, Option<PathBuf>), ServerError> {
    let path = std::env::var_os(CONFIG_ENV)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    if path.exists() {
        let config = CoreConfig::from_file(&path)?;
        Ok((config, Some(path)))
    } else {
        let mut config = CoreConfig::default();
        config.infrastructure.apply_env_overrides();
        Ok((config, None))
    }
}

async fn connect(config: &CoreConfig) -> Result<PostgresPool, ServerError> {
    let workers = u32::try_from(config.scheduler.batch_workers).unwrap_or(u32::MAX);
    let pg_config = PostgresConfig::new(&config.infrastructure.postgres_url)
        .with_max_connections(workers.saturating_add(SPARE_CONNECTIONS));
    let pool = PostgresPool::connect(&pg_config).await?;
    pool.run_migrations().await?;
    Ok(pool)
}
