// SPDX-License-Identifier: GPL-3.0-only

//! Rebalancing advice for an existing composite disk.
//!
//! For each file the correlator yields, intersect its blocks with the
//! resolved sector map, look up the owning device's recent average
//! throughput, and compare against the best other member with enough
//! free capacity. Cold files — no history on their current device — are
//! skipped outright: recommending a move without performance evidence
//! invites oscillating advice. Files are processed in yield order and a
//! file is recommended at most once per run; capacity granted to a move
//! is debited so later files cannot overcommit the same target.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tdisk_contracts::{DriverControl, TdiskError, TdiskErrorKind};
use tdisk_correlator::{BlockMap, FileHandle, occupancy};
use tdisk_history::{DeviceKey, HistoryStore};
use tdisk_registry::Registry;
use tdisk_types::{DeviceId, FileAssignment, TDiskPerformanceImprovement};

/// Outcome of one rebalancing run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebalancePlan {
    pub assignments: Vec<FileAssignment>,
    pub summary: TDiskPerformanceImprovement,
}

struct MemberState {
    free_bytes: u64,
    average: Option<f64>,
}

/// Computes rebalancing advice for composite disk `minor`.
///
/// The online-member set is snapshotted once at the start and re-read at
/// the end; sectors gathered for a device that went offline mid-run are
/// treated as stale and its recommendations dropped rather than emitted
/// half-computed. Abandoning the `scan` iterator early (cancellation)
/// simply ends the run without publishing anything.
pub async fn rebalance(
    registry: &Registry,
    history: &HistoryStore,
    minor: u32,
    scan: impl IntoIterator<Item = FileHandle>,
    blockmap: &dyn BlockMap,
    min_improvement: f64,
) -> Result<RebalancePlan, TdiskError> {
    let info = registry.describe(minor).await?;
    let initial_online: HashSet<DeviceId> =
        registry.online_members(minor).await?.into_iter().collect();
    let sector_map = registry.resolve_all(minor).await?;

    let mut members: HashMap<DeviceId, MemberState> = HashMap::new();
    for device in registry.devices(minor).await? {
        let used_bytes = sector_map
            .iter()
            .filter(|sector| sector.used && sector.physical.device == device.id)
            .count() as u64
            * u64::from(info.blocksize);

        members.insert(
            device.id,
            MemberState {
                free_bytes: device.capacity.saturating_sub(used_bytes),
                average: history.average(DeviceKey::new(minor, device.id)),
            },
        );
    }

    let mut plan = RebalancePlan::default();
    let mut recommended: HashSet<PathBuf> = HashSet::new();

    for handle in scan {
        if handle.is_dir {
            continue;
        }
        if recommended.contains(&handle.path) {
            continue;
        }

        let blocks = match blockmap.data_blocks(&handle) {
            Ok(blocks) => blocks,
            Err(error) if error.kind == TdiskErrorKind::NotFound => continue,
            Err(error) => {
                tracing::warn!(path = ?handle.path, %error, "skipping unreadable file");
                continue;
            }
        };

        let occ = occupancy(&blocks, blockmap.blocksize(), &sector_map, info.blocksize);
        let Some(current) = occ.primary_device() else {
            continue;
        };
        if !initial_online.contains(&current) {
            continue;
        }

        // Cold files carry no evidence; never recommend moving them.
        let Some(current_avg) = members.get(&current).and_then(|state| state.average) else {
            continue;
        };

        let file_bytes = occ.total_bytes();
        let target = members
            .iter()
            .filter(|(id, state)| {
                **id != current
                    && initial_online.contains(*id)
                    && state.free_bytes >= file_bytes
                    && state.average.is_some()
            })
            .max_by(|left, right| {
                let left_avg = left.1.average.unwrap_or(f64::MIN);
                let right_avg = right.1.average.unwrap_or(f64::MIN);
                left_avg.total_cmp(&right_avg).then(right.0.cmp(left.0))
            })
            .map(|(id, state)| (*id, state.average.unwrap_or(f64::MIN)));

        let Some((target, target_avg)) = target else {
            continue;
        };

        // Moving helps when the target is faster; the estimate is the
        // positive throughput delta.
        let improvement = target_avg - current_avg;
        if improvement < min_improvement {
            continue;
        }

        let Some(sector_range) = occ.sector_range else {
            continue;
        };

        if let Some(state) = members.get_mut(&target) {
            state.free_bytes -= file_bytes;
        }

        recommended.insert(handle.path.clone());
        plan.summary.add_file(handle.path.clone(), improvement);
        plan.assignments.push(FileAssignment {
            path: handle.path,
            current_device: current,
            sector_range,
            target_device: target,
            improvement,
        });
    }

    // Devices that disappeared mid-run invalidate what was gathered for
    // them: exclude those recommendations instead of emitting stale ones.
    let final_online: HashSet<DeviceId> =
        registry.online_members(minor).await?.into_iter().collect();
    if final_online != initial_online {
        let stale: Vec<PathBuf> = plan
            .assignments
            .iter()
            .filter(|assignment| {
                !final_online.contains(&assignment.current_device)
                    || !final_online.contains(&assignment.target_device)
            })
            .map(|assignment| assignment.path.clone())
            .collect();

        if !stale.is_empty() {
            tracing::info!(
                minor,
                dropped = stale.len(),
                "dropping recommendations for devices that went offline mid-run"
            );
            plan.assignments
                .retain(|assignment| !stale.contains(&assignment.path));
            plan.summary = {
                let mut summary = TDiskPerformanceImprovement::default();
                for assignment in &plan.assignments {
                    summary.add_file(assignment.path.clone(), assignment.improvement);
                }
                summary
            };
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use tdisk_correlator::FakeBlockMap;
    use tdisk_history::HistoryConfig;
    use tdisk_testing::{FakeDriver, member_device, sample};
    use tdisk_types::{SectorIndex, SectorInfo};

    const MB: u64 = 1 << 20;
    const BS: u32 = 4096;

    /// Two-member disk: device 0 ("A") and device 1 ("B"). The sector
    /// map places the first `a_used` sectors on A (used), then B's used
    /// share, then the rest of B unused.
    fn scenario_driver(a_capacity: u64, b_capacity: u64, b_used: u64) -> Arc<FakeDriver> {
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(
            0,
            BS,
            vec![
                member_device(0, a_capacity, BS),
                member_device(1, b_capacity, BS),
            ],
        );

        let a_sectors = a_capacity / u64::from(BS);
        let b_sectors = b_capacity / u64::from(BS);
        let b_used_sectors = b_used / u64::from(BS);

        let mut map = Vec::new();
        for logical in 0..(a_sectors + b_sectors) {
            let (device, sector, used) = if logical < a_sectors {
                (0, logical, true)
            } else {
                let b_sector = logical - a_sectors;
                (1, b_sector, b_sector < b_used_sectors)
            };
            map.push(SectorInfo {
                logical_sector: logical,
                physical: SectorIndex { device, sector },
                access_count: 0,
                used,
            });
        }
        driver.set_sector_map(0, map);
        driver
    }

    fn file(path: &str, size: u64, inode: u64) -> FileHandle {
        FileHandle {
            path: PathBuf::from(path),
            is_dir: false,
            size,
            inode,
        }
    }

    /// Pins a file's blocks to the first `size` bytes of device 0.
    fn blockmap_with_file_on_a(path: &str, size: u64) -> FakeBlockMap {
        let mut map = FakeBlockMap::new(BS);
        map.insert(path, (0..size / u64::from(BS)).collect());
        map
    }

    fn history_for(driver_minor: u32, averages: &[(DeviceId, f64)]) -> HistoryStore {
        let history = HistoryStore::new(HistoryConfig { capacity: 64 }).unwrap();
        for &(device, throughput) in averages {
            for sequence in 0..64 {
                history.record(
                    DeviceKey::new(driver_minor, device),
                    sample(sequence, throughput),
                );
            }
        }
        history
    }

    #[tokio::test]
    async fn file_on_slow_device_moves_to_fast_one() {
        // A: 20 MB holding a 10 MB file, avg 50 MB/s.
        // B: 25 MB with 60% used (10 MB free), avg 150 MB/s.
        let driver = scenario_driver(20 * MB, 25 * MB, 15 * MB);
        let registry = Registry::new(driver);
        let history = history_for(0, &[(0, 50.0), (1, 150.0)]);
        let blockmap = blockmap_with_file_on_a("/mnt/video.bin", 10 * MB);

        let plan = rebalance(
            &registry,
            &history,
            0,
            vec![file("/mnt/video.bin", 10 * MB, 12)],
            &blockmap,
            5.0,
        )
        .await
        .unwrap();

        assert_eq!(plan.assignments.len(), 1);
        let assignment = &plan.assignments[0];
        assert_eq!(assignment.current_device, 0);
        assert_eq!(assignment.target_device, 1);
        assert!(assignment.improvement > 0.0);
        assert!((plan.summary.total_improvement - 100.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn insufficient_target_capacity_blocks_the_move() {
        // B has only 1 MB free for a 10 MB file.
        let driver = scenario_driver(20 * MB, 25 * MB, 24 * MB);
        let registry = Registry::new(driver);
        let history = history_for(0, &[(0, 50.0), (1, 150.0)]);
        let blockmap = blockmap_with_file_on_a("/mnt/video.bin", 10 * MB);

        let plan = rebalance(
            &registry,
            &history,
            0,
            vec![file("/mnt/video.bin", 10 * MB, 12)],
            &blockmap,
            5.0,
        )
        .await
        .unwrap();

        assert!(plan.assignments.is_empty());
    }

    #[tokio::test]
    async fn cold_files_are_skipped() {
        let driver = scenario_driver(20 * MB, 25 * MB, 0);
        let registry = Registry::new(driver);
        // Only B has history; the file sits on A which is cold.
        let history = history_for(0, &[(1, 150.0)]);
        let blockmap = blockmap_with_file_on_a("/mnt/video.bin", 10 * MB);

        let plan = rebalance(
            &registry,
            &history,
            0,
            vec![file("/mnt/video.bin", 10 * MB, 12)],
            &blockmap,
            5.0,
        )
        .await
        .unwrap();

        assert!(plan.assignments.is_empty());
    }

    #[tokio::test]
    async fn no_file_is_recommended_twice() {
        let driver = scenario_driver(20 * MB, 40 * MB, 0);
        let registry = Registry::new(driver);
        let history = history_for(0, &[(0, 50.0), (1, 150.0)]);
        let blockmap = blockmap_with_file_on_a("/mnt/video.bin", 10 * MB);

        let plan = rebalance(
            &registry,
            &history,
            0,
            vec![
                file("/mnt/video.bin", 10 * MB, 12),
                file("/mnt/video.bin", 10 * MB, 12),
            ],
            &blockmap,
            5.0,
        )
        .await
        .unwrap();

        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.summary.files.len(), 1);
    }

    #[tokio::test]
    async fn capacity_is_debited_within_one_run() {
        // Two 10 MB files on A; B has 10 MB free, room for only one.
        let driver = scenario_driver(40 * MB, 25 * MB, 15 * MB);
        let registry = Registry::new(driver);
        let history = history_for(0, &[(0, 50.0), (1, 150.0)]);

        let mut blockmap = FakeBlockMap::new(BS);
        let blocks_per_file = 10 * MB / u64::from(BS);
        blockmap.insert("/mnt/first.bin", (0..blocks_per_file).collect());
        blockmap.insert(
            "/mnt/second.bin",
            (blocks_per_file..2 * blocks_per_file).collect(),
        );

        let plan = rebalance(
            &registry,
            &history,
            0,
            vec![
                file("/mnt/first.bin", 10 * MB, 12),
                file("/mnt/second.bin", 10 * MB, 13),
            ],
            &blockmap,
            5.0,
        )
        .await
        .unwrap();

        assert_eq!(plan.assignments.len(), 1);
        assert_eq!(plan.assignments[0].path, PathBuf::from("/mnt/first.bin"));
    }

    #[tokio::test]
    async fn devices_going_offline_mid_run_are_excluded() {
        let driver = scenario_driver(20 * MB, 25 * MB, 0);
        let registry = Registry::new(Arc::clone(&driver) as Arc<dyn DriverControl>);
        let history = history_for(0, &[(0, 50.0), (1, 150.0)]);
        let blockmap = blockmap_with_file_on_a("/mnt/video.bin", 10 * MB);

        /// Yields its single file, then pulls the disk offline before
        /// the run finishes.
        struct FlipOffline {
            item: Option<FileHandle>,
            driver: Arc<FakeDriver>,
        }

        impl Iterator for FlipOffline {
            type Item = FileHandle;

            fn next(&mut self) -> Option<FileHandle> {
                let item = self.item.take();
                if item.is_none() {
                    self.driver.set_online(0, false);
                }
                item
            }
        }

        let scan = FlipOffline {
            item: Some(file("/mnt/video.bin", 10 * MB, 12)),
            driver: Arc::clone(&driver),
        };

        let plan = rebalance(&registry, &history, 0, scan, &blockmap, 5.0)
            .await
            .unwrap();

        assert!(plan.assignments.is_empty());
        assert!(plan.summary.files.is_empty());
    }

    #[tokio::test]
    async fn below_threshold_improvement_is_not_recommended() {
        let driver = scenario_driver(20 * MB, 25 * MB, 0);
        let registry = Registry::new(driver);
        let history = history_for(0, &[(0, 148.0), (1, 150.0)]);
        let blockmap = blockmap_with_file_on_a("/mnt/video.bin", 10 * MB);

        let plan = rebalance(
            &registry,
            &history,
            0,
            vec![file("/mnt/video.bin", 10 * MB, 12)],
            &blockmap,
            5.0,
        )
        .await
        .unwrap();

        assert!(plan.assignments.is_empty());
    }
}
