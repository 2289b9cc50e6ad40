// SPDX-License-Identifier: GPL-3.0-only

//! Liveness supervision of plugin workers.
//!
//! Polling runs on its own timer and uses the client's probe path, so it
//! never waits behind in-flight data I/O. Health snapshots are published
//! over a watch channel; the registry folds them into composite-disk
//! online status. A worker that stops answering is marked dead without
//! tearing anything else down, and flips back to alive once probes
//! succeed again.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::PluginClient;
use tdisk_contracts::BlockWorker;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_millis(500),
        }
    }
}

/// Snapshot of worker liveness, keyed by plugin name.
///
/// Workers that have never been probed count as alive; absence of
/// evidence is not an outage.
#[derive(Debug, Clone, Default)]
pub struct WorkerHealth {
    alive: HashMap<String, bool>,
}

impl WorkerHealth {
    pub fn is_alive(&self, plugin: &str) -> bool {
        self.alive.get(plugin).copied().unwrap_or(true)
    }

    pub fn dead_workers(&self) -> impl Iterator<Item = &str> {
        self.alive
            .iter()
            .filter(|(_, alive)| !**alive)
            .map(|(name, _)| name.as_str())
    }
}

pub struct Supervisor {
    clients: Vec<PluginClient>,
    config: SupervisorConfig,
    health_tx: watch::Sender<WorkerHealth>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (health_tx, _) = watch::channel(WorkerHealth::default());
        Self {
            clients: Vec::new(),
            config,
            health_tx,
        }
    }

    pub fn register(&mut self, client: PluginClient) {
        self.clients.push(client);
    }

    /// Handle the registry (or anyone else) uses to observe liveness
    pub fn health(&self) -> watch::Receiver<WorkerHealth> {
        self.health_tx.subscribe()
    }

    /// Probes every registered worker once and publishes the snapshot
    pub async fn poll_once(&self) {
        let timeout = self.config.probe_timeout;
        let probes = self.clients.iter().map(|client| async move {
            let alive = client.probe(timeout).await;
            (client.name().to_string(), alive)
        });

        let alive: HashMap<String, bool> = join_all(probes).await.into_iter().collect();

        for (name, ok) in &alive {
            if !ok {
                tracing::warn!(plugin = %name, "worker missed liveness probe");
            }
        }

        self.health_tx.send_replace(WorkerHealth { alive });
    }

    /// Timer-driven polling loop
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll_once().await,
            }
        }
    }
}
