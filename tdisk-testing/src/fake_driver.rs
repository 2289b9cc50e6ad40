// SPDX-License-Identifier: GPL-3.0-only

//! In-memory `DriverControl` implementation.
//!
//! Deterministic where the real driver is hardware-dependent: logical
//! sectors stripe round-robin across members unless a test installs an
//! explicit sector map. Topology changes (offline flips, pushed samples)
//! take effect on the next query, mirroring how the registry re-queries
//! the real driver instead of caching.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use tdisk_contracts::{DriverControl, MemberSpec, TdiskError};
use tdisk_types::{
    CompositeDiskInfo, DebugInfo, Device, DeviceId, PerformanceSample, SectorIndex, SectorInfo,
};

const DEFAULT_CANDIDATE_CAPACITY: u64 = 1 << 30;

struct FakeDisk {
    name: String,
    blocksize: u32,
    online: bool,
    members: Vec<Device>,
    sector_map: Option<Vec<SectorInfo>>,
    samples: Vec<(DeviceId, PerformanceSample)>,
}

impl FakeDisk {
    fn max_sectors(&self) -> u64 {
        let capacity: u64 = self.members.iter().map(|member| member.capacity).sum();
        capacity / u64::from(self.blocksize)
    }

    fn striped_index(&self, logical_sector: u64) -> SectorIndex {
        let members = self.members.len() as u64;
        SectorIndex {
            device: (logical_sector % members) as DeviceId,
            sector: logical_sector / members,
        }
    }

    fn sector_info(&self, logical_sector: u64) -> SectorInfo {
        match &self.sector_map {
            Some(map) => map[logical_sector as usize],
            None => SectorInfo {
                logical_sector,
                physical: self.striped_index(logical_sector),
                access_count: 0,
                used: false,
            },
        }
    }
}

#[derive(Default)]
struct Inner {
    disks: HashMap<u32, FakeDisk>,
    candidate_capacities: HashMap<String, u64>,
}

/// The fake driver. Clone-free; share it via `Arc`.
pub struct FakeDriver {
    inner: Mutex<Inner>,
    next_minor: AtomicU32,
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_minor: AtomicU32::new(0),
        }
    }

    /// Declares the capacity `create` should discover for a member name
    pub fn stage_candidate(&self, name: impl Into<String>, capacity: u64) {
        let mut inner = self.inner.lock().expect("fake driver lock poisoned");
        inner.candidate_capacities.insert(name.into(), capacity);
    }

    /// Inserts a fully-specified disk, bypassing `create`
    pub fn add_disk(&self, minor: u32, blocksize: u32, members: Vec<Device>) {
        let mut inner = self.inner.lock().expect("fake driver lock poisoned");
        inner.disks.insert(
            minor,
            FakeDisk {
                name: format!("td{minor}"),
                blocksize,
                online: true,
                members,
                sector_map: None,
                samples: Vec::new(),
            },
        );
        self.next_minor.fetch_max(minor + 1, Ordering::SeqCst);
    }

    pub fn set_online(&self, minor: u32, online: bool) {
        let mut inner = self.inner.lock().expect("fake driver lock poisoned");
        if let Some(disk) = inner.disks.get_mut(&minor) {
            disk.online = online;
        }
    }

    /// Installs an explicit logical-to-physical map (one entry per
    /// logical sector, ascending)
    pub fn set_sector_map(&self, minor: u32, map: Vec<SectorInfo>) {
        let mut inner = self.inner.lock().expect("fake driver lock poisoned");
        if let Some(disk) = inner.disks.get_mut(&minor) {
            disk.sector_map = Some(map);
        }
    }

    /// Appends a throughput sample to the disk's debug feed
    pub fn push_sample(&self, minor: u32, device: DeviceId, sample: PerformanceSample) {
        let mut inner = self.inner.lock().expect("fake driver lock poisoned");
        if let Some(disk) = inner.disks.get_mut(&minor) {
            disk.samples.push((device, sample));
        }
    }

    fn with_disk<T>(
        &self,
        minor: u32,
        f: impl FnOnce(&FakeDisk) -> Result<T, TdiskError>,
    ) -> Result<T, TdiskError> {
        let inner = self.inner.lock().expect("fake driver lock poisoned");
        let disk = inner
            .disks
            .get(&minor)
            .ok_or_else(|| TdiskError::not_found(format!("no composite disk with minor {minor}")))?;
        f(disk)
    }
}

#[async_trait]
impl DriverControl for FakeDriver {
    async fn create(
        &self,
        minor: Option<u32>,
        blocksize: u32,
        members: Vec<MemberSpec>,
    ) -> Result<CompositeDiskInfo, TdiskError> {
        if blocksize == 0 || !blocksize.is_power_of_two() {
            return Err(TdiskError::invalid(format!("bad blocksize {blocksize}")));
        }
        if members.is_empty() {
            return Err(TdiskError::invalid("a composite disk needs members"));
        }

        let minor = minor.unwrap_or_else(|| self.next_minor.fetch_add(1, Ordering::SeqCst));

        let mut inner = self.inner.lock().expect("fake driver lock poisoned");
        if inner.disks.contains_key(&minor) {
            return Err(TdiskError::invalid(format!("minor {minor} already in use")));
        }

        let members: Vec<Device> = members
            .into_iter()
            .enumerate()
            .map(|(id, spec)| {
                let capacity = inner
                    .candidate_capacities
                    .get(&spec.name)
                    .copied()
                    .unwrap_or(DEFAULT_CANDIDATE_CAPACITY);
                Device {
                    id: id as DeviceId,
                    name: spec.name,
                    kind: spec.kind,
                    capacity: capacity - capacity % u64::from(blocksize),
                    blocksize,
                    bytes_read: 0,
                    bytes_written: 0,
                    access_count: 0,
                    redundant: spec.redundant,
                }
            })
            .collect();

        let disk = FakeDisk {
            name: format!("td{minor}"),
            blocksize,
            online: true,
            members,
            sector_map: None,
            samples: Vec::new(),
        };

        let info = CompositeDiskInfo {
            minor,
            name: disk.name.clone(),
            blocksize,
            max_sectors: disk.max_sectors(),
            online: true,
        };

        inner.disks.insert(minor, disk);
        self.next_minor.fetch_max(minor + 1, Ordering::SeqCst);
        Ok(info)
    }

    async fn remove(&self, minor: u32) -> Result<(), TdiskError> {
        let mut inner = self.inner.lock().expect("fake driver lock poisoned");
        inner
            .disks
            .remove(&minor)
            .map(|_| ())
            .ok_or_else(|| TdiskError::not_found(format!("no composite disk with minor {minor}")))
    }

    async fn list(&self) -> Result<Vec<u32>, TdiskError> {
        let inner = self.inner.lock().expect("fake driver lock poisoned");
        let mut minors: Vec<u32> = inner.disks.keys().copied().collect();
        minors.sort_unstable();
        Ok(minors)
    }

    async fn disk_info(&self, minor: u32) -> Result<CompositeDiskInfo, TdiskError> {
        self.with_disk(minor, |disk| {
            Ok(CompositeDiskInfo {
                minor,
                name: disk.name.clone(),
                blocksize: disk.blocksize,
                max_sectors: disk.max_sectors(),
                online: disk.online,
            })
        })
    }

    async fn size_bytes(&self, minor: u32) -> Result<u64, TdiskError> {
        self.with_disk(minor, |disk| {
            Ok(disk.max_sectors() * u64::from(disk.blocksize))
        })
    }

    async fn blocksize(&self, minor: u32) -> Result<u32, TdiskError> {
        self.with_disk(minor, |disk| Ok(disk.blocksize))
    }

    async fn max_sectors(&self, minor: u32) -> Result<u64, TdiskError> {
        self.with_disk(minor, |disk| Ok(disk.max_sectors()))
    }

    async fn sector_index(
        &self,
        minor: u32,
        logical_sector: u64,
    ) -> Result<SectorIndex, TdiskError> {
        self.with_disk(minor, |disk| {
            if !disk.online {
                return Err(TdiskError::offline(format!("td{minor} is offline")));
            }
            if logical_sector >= disk.max_sectors() {
                return Err(TdiskError::out_of_range(format!(
                    "sector {logical_sector} beyond {}",
                    disk.max_sectors()
                )));
            }
            Ok(disk.sector_info(logical_sector).physical)
        })
    }

    async fn all_sector_indices(&self, minor: u32) -> Result<Vec<SectorInfo>, TdiskError> {
        self.with_disk(minor, |disk| {
            if !disk.online {
                return Err(TdiskError::offline(format!("td{minor} is offline")));
            }
            Ok((0..disk.max_sectors())
                .map(|logical| disk.sector_info(logical))
                .collect())
        })
    }

    async fn device_info(&self, minor: u32, device: DeviceId) -> Result<Device, TdiskError> {
        self.with_disk(minor, |disk| {
            disk.members
                .iter()
                .find(|member| member.id == device)
                .cloned()
                .ok_or_else(|| {
                    TdiskError::not_found(format!("td{minor} has no member device {device}"))
                })
        })
    }

    async fn device_count(&self, minor: u32) -> Result<u32, TdiskError> {
        self.with_disk(minor, |disk| Ok(disk.members.len() as u32))
    }

    async fn clear_access_count(&self, minor: u32) -> Result<(), TdiskError> {
        let mut inner = self.inner.lock().expect("fake driver lock poisoned");
        let disk = inner
            .disks
            .get_mut(&minor)
            .ok_or_else(|| TdiskError::not_found(format!("no composite disk with minor {minor}")))?;

        for member in &mut disk.members {
            member.access_count = 0;
        }
        if let Some(map) = &mut disk.sector_map {
            for info in map {
                info.access_count = 0;
            }
        }
        Ok(())
    }

    async fn debug_info(&self, minor: u32, since_sequence: u64) -> Result<DebugInfo, TdiskError> {
        self.with_disk(minor, |disk| {
            if !disk.online {
                return Err(TdiskError::offline(format!("td{minor} is offline")));
            }

            let samples: Vec<(DeviceId, PerformanceSample)> = disk
                .samples
                .iter()
                .filter(|(_, sample)| sample.sequence > since_sequence)
                .copied()
                .collect();

            let latest_sequence = samples
                .iter()
                .map(|(_, sample)| sample.sequence)
                .max()
                .unwrap_or(since_sequence);

            Ok(DebugInfo {
                latest_sequence,
                samples,
            })
        })
    }
}
