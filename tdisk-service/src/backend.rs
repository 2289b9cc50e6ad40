// SPDX-License-Identifier: GPL-3.0-only

//! The backend facade.
//!
//! Every operation exposed to external callers reports through a
//! [`BackendResult`] instead of signaling success by absence of error, so
//! partial outcomes (one disk unreachable while the others listed fine)
//! stay visible. Rendering the result is the caller's business.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use tdisk_advisor::{AdvisorConfig, create_new_raid, get_tdisk_advices, rebalance};
use tdisk_contracts::{DiskHooks, DriverControl, TdiskError, TdiskErrorKind};
use tdisk_correlator::{BlockMap, FiemapBlockMap, FileHandle, FileScan};
use tdisk_history::{DeviceKey, HistoryStore};
use tdisk_plugin::WorkerHealth;
use tdisk_registry::Registry;
use tdisk_types::{
    BackendResult, CandidateDevice, ResultCategory, TDiskAdvice, bytes_to_pretty,
};

pub struct Backend {
    driver: Arc<dyn DriverControl>,
    registry: Registry,
    history: Arc<HistoryStore>,
    hooks: Arc<dyn DiskHooks>,
    advisor_config: AdvisorConfig,

    /// Member-name to history-key index, kept across detachments so
    /// candidate scoring can still see a device's past performance.
    name_index: Mutex<HashMap<String, DeviceKey>>,
}

impl Backend {
    pub fn new(
        driver: Arc<dyn DriverControl>,
        history: Arc<HistoryStore>,
        hooks: Arc<dyn DiskHooks>,
        advisor_config: AdvisorConfig,
    ) -> Self {
        Self {
            registry: Registry::new(Arc::clone(&driver)),
            driver,
            history,
            hooks,
            advisor_config,
            name_index: Mutex::new(HashMap::new()),
        }
    }

    /// Folds plugin worker liveness into every online decision
    pub fn with_plugin_health(mut self, health: watch::Receiver<WorkerHealth>) -> Self {
        self.registry = Registry::new(Arc::clone(&self.driver)).with_plugin_health(health);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn note_members(&self, minor: u32) {
        if let Ok(devices) = self.registry.devices(minor).await {
            let mut index = self.name_index.lock().expect("name index poisoned");
            for device in devices {
                index.insert(device.name, DeviceKey::new(minor, device.id));
            }
        }
    }

    /// All composite disks known to the driver
    pub async fn list_tdisks(&self) -> BackendResult {
        let mut result = BackendResult::new();

        let minors = match self.driver.list().await {
            Ok(minors) => minors,
            Err(error) => {
                result.error(ResultCategory::Driver, error.to_string());
                return result;
            }
        };

        for minor in &minors {
            match self.registry.describe(*minor).await {
                Ok(info) => {
                    self.note_members(*minor).await;
                    result.value(ResultCategory::General, format!("td{minor}"), &info);
                }
                Err(error) => {
                    result.warning(
                        ResultCategory::General,
                        format!("td{minor} could not be described: {error}"),
                    );
                }
            }
        }

        result.message(
            ResultCategory::General,
            format!("{} composite disks", minors.len()),
        );
        result
    }

    /// One composite disk with its member devices and their counters
    pub async fn describe_tdisk(&self, minor: u32) -> BackendResult {
        let mut result = BackendResult::new();

        match self.registry.describe(minor).await {
            Ok(info) => {
                result.value(ResultCategory::General, format!("td{minor}"), &info);
            }
            Err(error) => {
                record_failure(&mut result, ResultCategory::General, &error);
                return result;
            }
        }

        self.note_members(minor).await;

        match self.registry.devices(minor).await {
            Ok(devices) => {
                for device in devices {
                    result.value(
                        ResultCategory::General,
                        format!(
                            "device {}: {}",
                            device.id,
                            bytes_to_pretty(device.capacity, true)
                        ),
                        &device,
                    );
                }
            }
            Err(error) => record_failure(&mut result, ResultCategory::General, &error),
        }

        result
    }

    /// Scores combinations of currently-unattached devices
    pub async fn list_advices(&self, candidates: &[CandidateDevice]) -> BackendResult {
        let mut result = BackendResult::new();

        if candidates.len() < 2 {
            result.warning(
                ResultCategory::Advice,
                "need at least two unattached devices to combine",
            );
            return result;
        }

        let index = self
            .name_index
            .lock()
            .expect("name index poisoned")
            .clone();
        let history = Arc::clone(&self.history);
        let perf = move |name: &str| {
            index
                .get(name)
                .and_then(|key| history.average(*key))
        };

        let advices = get_tdisk_advices(candidates, &self.advisor_config, &perf);
        for (rank, advice) in advices.iter().enumerate() {
            result.value(
                ResultCategory::Advice,
                format!(
                    "rank {}: {}",
                    rank + 1,
                    bytes_to_pretty(advice.capacity_estimate, false)
                ),
                advice,
            );
        }

        result.message(
            ResultCategory::Advice,
            format!("{} combinations scored", advices.len()),
        );
        result
    }

    /// Rebalancing recommendations for one composite disk, driven by an
    /// arbitrary scan and block map (tests inject doubles here)
    pub async fn list_recommendations(
        &self,
        minor: u32,
        scan: impl IntoIterator<Item = FileHandle>,
        blockmap: &dyn BlockMap,
    ) -> BackendResult {
        let mut result = BackendResult::new();

        let plan = match rebalance(
            &self.registry,
            &self.history,
            minor,
            scan,
            blockmap,
            self.advisor_config.min_improvement,
        )
        .await
        {
            Ok(plan) => plan,
            Err(error) => {
                record_failure(&mut result, ResultCategory::Rebalance, &error);
                return result;
            }
        };

        for assignment in &plan.assignments {
            result.value(
                ResultCategory::Rebalance,
                format!("move {}", assignment.path.display()),
                assignment,
            );
        }
        result.value(
            ResultCategory::Rebalance,
            format!(
                "estimated gain {:.1} MB/s over {} files",
                plan.summary.total_improvement,
                plan.summary.files.len()
            ),
            &plan.summary,
        );
        result
    }

    /// Production entry point: walks the mounted filesystem at `root`
    /// with the extent-based block map
    pub async fn recommendations_for_mount(&self, minor: u32, root: &Path) -> BackendResult {
        let blockmap = match FiemapBlockMap::open(root) {
            Ok(blockmap) => blockmap,
            Err(error) => {
                let mut result = BackendResult::new();
                record_failure(&mut result, ResultCategory::Rebalance, &error);
                return result;
            }
        };

        self.list_recommendations(minor, FileScan::new(root), &blockmap)
            .await
    }

    /// Materializes a scored combination into a new composite disk
    pub async fn create_tdisk(&self, advice: &TDiskAdvice) -> BackendResult {
        let mut result = BackendResult::new();

        match create_new_raid(&self.driver, &*self.hooks, advice).await {
            Ok(info) => {
                self.note_members(info.minor).await;
                result.value(
                    ResultCategory::Create,
                    format!("created td{}", info.minor),
                    &info,
                );
            }
            Err(error) => record_failure(&mut result, ResultCategory::Create, &error),
        }

        result
    }

    /// Removes a composite disk: pre-remove hook, driver removal, then
    /// history retirement for its members
    pub async fn remove_tdisk(&self, minor: u32) -> BackendResult {
        let mut result = BackendResult::new();

        let info = match self.driver.disk_info(minor).await {
            Ok(info) => info,
            Err(error) => {
                record_failure(&mut result, ResultCategory::General, &error);
                return result;
            }
        };

        let members = self.registry.devices(minor).await.unwrap_or_default();

        if let Err(error) = self.hooks.pre_remove(&info).await {
            tracing::warn!(minor, %error, "pre-remove hook failed");
            result.warning(
                ResultCategory::General,
                format!("pre-remove hook failed: {error}"),
            );
        }

        match self.driver.remove(minor).await {
            Ok(()) => {
                for device in members {
                    self.history.forget(DeviceKey::new(minor, device.id));
                }
                result.message(ResultCategory::General, format!("removed td{minor}"));
            }
            Err(error) => record_failure(&mut result, ResultCategory::General, &error),
        }

        result
    }
}

fn record_failure(result: &mut BackendResult, category: ResultCategory, error: &TdiskError) {
    match error.kind {
        TdiskErrorKind::DeviceOffline => result.offline(category, error.to_string()),
        _ => result.error(category, error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use tdisk_correlator::FakeBlockMap;
    use tdisk_history::HistoryConfig;
    use tdisk_testing::{FakeDriver, candidate, member_device, sample};
    use tdisk_types::{CompositeDiskInfo, ResultKind, SectorIndex, SectorInfo};

    struct NoopHooks;

    #[async_trait]
    impl DiskHooks for NoopHooks {
        async fn post_create(&self, _disk: &CompositeDiskInfo) -> Result<(), TdiskError> {
            Ok(())
        }

        async fn pre_remove(&self, _disk: &CompositeDiskInfo) -> Result<(), TdiskError> {
            Ok(())
        }
    }

    fn backend(driver: Arc<FakeDriver>) -> Backend {
        let history = Arc::new(HistoryStore::new(HistoryConfig { capacity: 64 }).unwrap());
        Backend::new(
            driver,
            history,
            Arc::new(NoopHooks),
            AdvisorConfig::default(),
        )
    }

    #[tokio::test]
    async fn listing_reports_each_disk_and_a_summary() {
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(0, 4096, vec![member_device(0, 8 << 20, 4096)]);
        driver.add_disk(1, 4096, vec![member_device(0, 8 << 20, 4096)]);

        let result = backend(driver).list_tdisks().await;

        assert!(result.succeeded());
        let entries = result.entries(ResultCategory::General);
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().filter(|entry| entry.value.is_some()).count() == 2);
    }

    #[tokio::test]
    async fn describing_a_missing_disk_fails() {
        let result = backend(Arc::new(FakeDriver::new())).describe_tdisk(9).await;

        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn advices_are_ranked_values() {
        let driver = Arc::new(FakeDriver::new());
        let backend = backend(driver);

        let result = backend
            .list_advices(&[
                candidate("/dev/sdb", 100 << 30),
                candidate("/dev/sdc", 200 << 30),
                candidate("/dev/sdd", 300 << 30),
            ])
            .await;

        assert!(result.succeeded());
        let values: Vec<_> = result
            .entries(ResultCategory::Advice)
            .iter()
            .filter(|entry| entry.value.is_some())
            .collect();
        // Three pairs plus the triple.
        assert_eq!(values.len(), 4);
        assert_eq!(values[0].message, "rank 1: 600.00 GB");
    }

    #[tokio::test]
    async fn create_then_remove_roundtrip() {
        let driver = Arc::new(FakeDriver::new());
        driver.stage_candidate("/dev/sdb", 8 << 30);
        driver.stage_candidate("/dev/sdc", 8 << 30);
        let backend = backend(Arc::clone(&driver));

        let advices = backend
            .list_advices(&[
                candidate("/dev/sdb", 8 << 30),
                candidate("/dev/sdc", 8 << 30),
            ])
            .await;
        assert!(advices.succeeded());

        let advice: TDiskAdvice = serde_json::from_value(
            advices.entries(ResultCategory::Advice)[0]
                .value
                .clone()
                .unwrap(),
        )
        .unwrap();

        let created = backend.create_tdisk(&advice).await;
        assert!(created.succeeded());

        let removed = backend.remove_tdisk(0).await;
        assert!(removed.succeeded());
        assert!(driver.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recommendations_on_offline_disk_report_offline_not_error() {
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(0, 4096, vec![member_device(0, 8 << 20, 4096)]);
        driver.set_online(0, false);
        let backend = backend(driver);

        let blockmap = FakeBlockMap::new(4096);
        let result = backend
            .list_recommendations(0, Vec::<FileHandle>::new(), &blockmap)
            .await;

        let entries = result.entries(ResultCategory::Rebalance);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ResultKind::Offline);
    }

    #[tokio::test]
    async fn recommendations_surface_assignments() {
        const MB: u64 = 1 << 20;
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(
            0,
            4096,
            vec![
                member_device(0, 20 * MB, 4096),
                member_device(1, 25 * MB, 4096),
            ],
        );

        // First 5120 sectors on device 0 (used), rest on device 1 (free).
        let a_sectors = 20 * MB / 4096;
        let total = (20 * MB + 25 * MB) / 4096;
        let map: Vec<SectorInfo> = (0..total)
            .map(|logical| {
                let on_a = logical < a_sectors;
                SectorInfo {
                    logical_sector: logical,
                    physical: SectorIndex {
                        device: if on_a { 0 } else { 1 },
                        sector: if on_a { logical } else { logical - a_sectors },
                    },
                    access_count: 0,
                    used: on_a,
                }
            })
            .collect();
        driver.set_sector_map(0, map);

        let backend = backend(driver);
        for sequence in 0..8 {
            backend.history.record(DeviceKey::new(0, 0), sample(sequence, 50.0));
            backend.history.record(DeviceKey::new(0, 1), sample(sequence, 150.0));
        }

        let mut blockmap = FakeBlockMap::new(4096);
        blockmap.insert("/mnt/big.bin", (0..(10 * MB / 4096)).collect());

        let scan = vec![FileHandle {
            path: PathBuf::from("/mnt/big.bin"),
            is_dir: false,
            size: 10 * MB,
            inode: 11,
        }];

        let result = backend.list_recommendations(0, scan, &blockmap).await;

        assert!(result.succeeded());
        let entries = result.entries(ResultCategory::Rebalance);
        assert!(entries[0].message.contains("/mnt/big.bin"));
    }
}
