// SPDX-License-Identifier: GPL-3.0-only

//! Device registry and sector mapper.
//!
//! A thin query layer over the external driver's control interface. The
//! registry holds no source of truth of its own: capacity, topology and
//! online status are re-queried on every call so that external changes
//! (disk pulled, network backend disconnected) are never served from
//! stale caches. The only local read-state is the plugin liveness
//! snapshot published by the supervisor, which is folded into
//! composite-disk online status.

use std::sync::Arc;

use tokio::sync::watch;

use tdisk_contracts::{BlockWorker, DriverControl, TdiskError};
use tdisk_plugin::WorkerHealth;
use tdisk_types::{
    CompositeDiskInfo, Device, DeviceId, DeviceKind, SectorIndex, SectorInfo,
};

pub struct Registry {
    driver: Arc<dyn DriverControl>,
    plugin_health: Option<watch::Receiver<WorkerHealth>>,
}

impl Registry {
    pub fn new(driver: Arc<dyn DriverControl>) -> Self {
        Self {
            driver,
            plugin_health: None,
        }
    }

    /// Attaches the supervisor's health feed; plugin-backed members with
    /// a dead worker make the whole disk count as offline.
    pub fn with_plugin_health(mut self, health: watch::Receiver<WorkerHealth>) -> Self {
        self.plugin_health = Some(health);
        self
    }

    pub fn driver(&self) -> &Arc<dyn DriverControl> {
        &self.driver
    }

    fn health_snapshot(&self) -> WorkerHealth {
        self.plugin_health
            .as_ref()
            .map(|health| health.borrow().clone())
            .unwrap_or_default()
    }

    /// Current members of a composite disk, ascending by device id
    pub async fn devices(&self, minor: u32) -> Result<Vec<Device>, TdiskError> {
        let count = self.driver.device_count(minor).await?;
        let mut members = Vec::with_capacity(count as usize);
        for device in 0..count {
            members.push(self.driver.device_info(minor, device).await?);
        }
        Ok(members)
    }

    /// Whether every member is currently reachable
    pub async fn is_online(&self, minor: u32) -> Result<bool, TdiskError> {
        let info = self.driver.disk_info(minor).await?;
        if !info.online {
            return Ok(false);
        }

        let health = self.health_snapshot();
        for member in self.devices(minor).await? {
            if member.kind == DeviceKind::PluginBacked && !health.is_alive(&member.name) {
                tracing::debug!(minor, plugin = %member.name, "member worker is dead");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Member devices reachable right now. Non-plugin members are
    /// reachable iff the driver reports the disk online; plugin members
    /// additionally need a live worker.
    pub async fn online_members(&self, minor: u32) -> Result<Vec<DeviceId>, TdiskError> {
        let info = self.driver.disk_info(minor).await?;
        if !info.online {
            return Ok(Vec::new());
        }

        let health = self.health_snapshot();
        Ok(self
            .devices(minor)
            .await?
            .into_iter()
            .filter(|member| {
                member.kind != DeviceKind::PluginBacked || health.is_alive(&member.name)
            })
            .map(|member| member.id)
            .collect())
    }

    /// Resolves one logical sector to its physical location.
    ///
    /// Fails with `DeviceOffline` when the disk is not fully reachable
    /// and with `OutOfRange` when the sector exceeds capacity.
    pub async fn resolve(&self, minor: u32, logical_sector: u64) -> Result<SectorIndex, TdiskError> {
        if !self.is_online(minor).await? {
            return Err(TdiskError::offline(format!(
                "composite disk {minor} is not online"
            )));
        }

        let max_sectors = self.driver.max_sectors(minor).await?;
        if logical_sector >= max_sectors {
            return Err(TdiskError::out_of_range(format!(
                "logical sector {logical_sector} beyond capacity {max_sectors}"
            )));
        }

        self.driver.sector_index(minor, logical_sector).await
    }

    /// Bulk resolution of the whole logical sector space, ascending by
    /// logical sector. One driver round trip; used by the correlator and
    /// advisor.
    pub async fn resolve_all(&self, minor: u32) -> Result<Vec<SectorInfo>, TdiskError> {
        if !self.is_online(minor).await? {
            return Err(TdiskError::offline(format!(
                "composite disk {minor} is not online"
            )));
        }

        self.driver.all_sector_indices(minor).await
    }

    pub async fn device_info(&self, minor: u32, device: DeviceId) -> Result<Device, TdiskError> {
        self.driver.device_info(minor, device).await
    }

    /// Resets only the access counters; byte counters are historical
    /// state and stay untouched.
    pub async fn clear_access_counters(&self, minor: u32) -> Result<(), TdiskError> {
        self.driver.clear_access_count(minor).await
    }

    /// All composite disks with the plugin-health overlay applied to
    /// their online flag
    pub async fn list(&self) -> Result<Vec<CompositeDiskInfo>, TdiskError> {
        let mut disks = Vec::new();
        for minor in self.driver.list().await? {
            disks.push(self.describe(minor).await?);
        }
        Ok(disks)
    }

    pub async fn describe(&self, minor: u32) -> Result<CompositeDiskInfo, TdiskError> {
        let mut info = self.driver.disk_info(minor).await?;
        info.online = self.is_online(minor).await?;
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use tdisk_contracts::TdiskErrorKind;
    use tdisk_plugin::{MemWorker, Supervisor, SupervisorConfig, spawn_worker};
    use tdisk_testing::{FakeDriver, member_device};
    use tdisk_types::Device;

    fn two_member_driver() -> Arc<FakeDriver> {
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(
            0,
            4096,
            vec![
                member_device(0, 8 << 20, 4096),
                member_device(1, 8 << 20, 4096),
            ],
        );
        driver
    }

    #[tokio::test]
    async fn resolve_within_range_returns_attached_member() {
        let registry = Registry::new(two_member_driver());

        let index = registry.resolve(0, 7).await.unwrap();
        let members = registry.devices(0).await.unwrap();
        assert!(members.iter().any(|member| member.id == index.device));
    }

    #[tokio::test]
    async fn resolve_beyond_capacity_is_out_of_range() {
        let registry = Registry::new(two_member_driver());
        let max = registry.driver().max_sectors(0).await.unwrap();

        let error = registry.resolve(0, max).await.unwrap_err();
        assert_eq!(error.kind, TdiskErrorKind::OutOfRange);
    }

    #[tokio::test]
    async fn resolve_on_offline_disk_fails_fast() {
        let driver = two_member_driver();
        driver.set_online(0, false);
        let registry = Registry::new(driver);

        let error = registry.resolve(0, 0).await.unwrap_err();
        assert_eq!(error.kind, TdiskErrorKind::DeviceOffline);
    }

    #[tokio::test]
    async fn resolve_all_preserves_ascending_order() {
        let registry = Registry::new(two_member_driver());

        let infos = registry.resolve_all(0).await.unwrap();
        assert!(!infos.is_empty());
        assert!(
            infos
                .windows(2)
                .all(|pair| pair[0].logical_sector < pair[1].logical_sector)
        );
    }

    #[tokio::test]
    async fn clearing_counters_spares_byte_counters() {
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(
            0,
            4096,
            vec![Device {
                bytes_read: 1_000,
                bytes_written: 2_000,
                access_count: 7,
                ..member_device(0, 8 << 20, 4096)
            }],
        );
        let registry = Registry::new(driver);

        registry.clear_access_counters(0).await.unwrap();

        let device = registry.device_info(0, 0).await.unwrap();
        assert_eq!(device.access_count, 0);
        assert_eq!(device.bytes_read, 1_000);
        assert_eq!(device.bytes_written, 2_000);
    }

    #[tokio::test]
    async fn dead_plugin_worker_takes_the_disk_offline() {
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(
            0,
            4096,
            vec![
                member_device(0, 8 << 20, 4096),
                Device {
                    name: "cloudstore".to_string(),
                    kind: tdisk_types::DeviceKind::PluginBacked,
                    ..member_device(1, 8 << 20, 4096)
                },
            ],
        );

        let worker = Arc::new(MemWorker::new("cloudstore", 8 << 20));
        let mut supervisor = Supervisor::new(SupervisorConfig {
            poll_interval: Duration::from_millis(20),
            probe_timeout: Duration::from_millis(50),
        });
        supervisor.register(spawn_worker(Arc::clone(&worker) as Arc<dyn BlockWorker>));

        let registry =
            Registry::new(Arc::clone(&driver) as Arc<dyn DriverControl>)
                .with_plugin_health(supervisor.health());

        supervisor.poll_once().await;
        assert!(registry.is_online(0).await.unwrap());

        worker.set_running(false);
        supervisor.poll_once().await;

        assert!(!registry.is_online(0).await.unwrap());
        let error = registry.resolve(0, 0).await.unwrap_err();
        assert_eq!(error.kind, TdiskErrorKind::DeviceOffline);

        // Metadata stays valid and the disk comes back once the worker
        // answers again.
        worker.set_running(true);
        supervisor.poll_once().await;
        assert!(registry.resolve(0, 0).await.is_ok());
    }
}
