// SPDX-License-Identifier: GPL-3.0-only

//! tDisk advisory daemon.
//!
//! Wires the driver adapter, performance sampler, plugin supervision and
//! the backend facade together. Process-scoped state (history store,
//! registry, supervisor) is created here at startup and passed by
//! reference into the components that need it; there are no ambient
//! singletons.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

mod adapters;
mod backend;
mod config;
mod hooks;
mod sampler;

use adapters::IoctlDriver;
use backend::Backend;
use config::ServiceConfig;
use hooks::ScriptHooks;
use sampler::Sampler;
use tdisk_contracts::DriverControl;
use tdisk_history::HistoryStore;
use tdisk_plugin::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tdisk_service=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting tDisk advisory service v{}", env!("CARGO_PKG_VERSION"));

    // The driver control node and raw block devices are root-only.
    if unsafe { libc::geteuid() } != 0 {
        tracing::error!("tdisk service must run as root");
        anyhow::bail!("service must run with root privileges");
    }

    let config_path = std::env::var_os("TDISK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/tdisk/service.toml"));
    let config = ServiceConfig::load(&config_path)?;

    let driver: Arc<dyn DriverControl> =
        Arc::new(IoctlDriver::new(&config.driver.control_path));
    let history = Arc::new(HistoryStore::new(config.history)?);
    let hooks = Arc::new(ScriptHooks::new(&config.hooks));

    let shutdown = CancellationToken::new();

    let supervisor = Supervisor::new(config.plugins.supervisor());
    let plugin_health = supervisor.health();
    tokio::spawn(supervisor.run(shutdown.clone()));

    let sampler = Sampler::new(
        Arc::clone(&driver),
        Arc::clone(&history),
        Duration::from_millis(config.sampler.interval_ms),
    );
    tokio::spawn(sampler.run(shutdown.clone()));

    let backend = Backend::new(
        Arc::clone(&driver),
        Arc::clone(&history),
        hooks,
        config.advisor,
    )
    .with_plugin_health(plugin_health);

    // Log a topology snapshot at startup so operators see what the
    // daemon found.
    let listing = backend.list_tdisks().await;
    for (category, entry) in listing.iter() {
        tracing::info!(?category, kind = ?entry.kind, "{}", entry.message);
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    shutdown.cancel();

    Ok(())
}
