// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tdisk_types::{
    CompositeDiskInfo, DebugInfo, Device, DeviceId, DeviceKind, SectorIndex, SectorInfo,
};

use crate::TdiskError;

/// One member device requested at composite-disk creation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberSpec {
    /// Device path for raw devices/partitions, plugin name otherwise
    pub name: String,
    pub kind: DeviceKind,
    pub redundant: bool,
}

/// Narrow control interface of the external block driver.
///
/// The driver is the single source of truth for topology, capacity and
/// online status; callers re-query instead of caching, so external
/// topology changes (disk pulled, network backend disconnected) are
/// picked up on the next call.
#[async_trait]
pub trait DriverControl: Send + Sync {
    /// Creates a composite disk, registering all members. Passing `None`
    /// for the minor lets the driver allocate one.
    async fn create(
        &self,
        minor: Option<u32>,
        blocksize: u32,
        members: Vec<MemberSpec>,
    ) -> Result<CompositeDiskInfo, TdiskError>;

    async fn remove(&self, minor: u32) -> Result<(), TdiskError>;

    /// Minor numbers of all composite disks known to the driver
    async fn list(&self) -> Result<Vec<u32>, TdiskError>;

    async fn disk_info(&self, minor: u32) -> Result<CompositeDiskInfo, TdiskError>;

    async fn size_bytes(&self, minor: u32) -> Result<u64, TdiskError>;

    async fn blocksize(&self, minor: u32) -> Result<u32, TdiskError>;

    async fn max_sectors(&self, minor: u32) -> Result<u64, TdiskError>;

    async fn sector_index(
        &self,
        minor: u32,
        logical_sector: u64,
    ) -> Result<SectorIndex, TdiskError>;

    /// Bulk variant of [`sector_index`](Self::sector_index); ascending
    /// logical-sector order.
    async fn all_sector_indices(&self, minor: u32) -> Result<Vec<SectorInfo>, TdiskError>;

    async fn device_info(&self, minor: u32, device: DeviceId) -> Result<Device, TdiskError>;

    async fn device_count(&self, minor: u32) -> Result<u32, TdiskError>;

    /// Resets only the access counters. Byte counters are historical and
    /// are never cleared.
    async fn clear_access_count(&self, minor: u32) -> Result<(), TdiskError>;

    /// Throughput samples recorded since `since_sequence`, the natural
    /// feed for the performance history store.
    async fn debug_info(&self, minor: u32, since_sequence: u64) -> Result<DebugInfo, TdiskError>;
}

/// Capability set an out-of-process plugin worker exposes to masquerade
/// as a block-addressable device.
#[async_trait]
pub trait BlockWorker: Send + Sync {
    fn name(&self) -> &str;

    async fn size(&self) -> Result<u64, TdiskError>;

    async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, TdiskError>;

    async fn write(&self, offset: u64, data: Vec<u8>) -> Result<(), TdiskError>;

    /// Liveness. Must answer without touching the data path so probes
    /// never queue behind an in-flight read or write.
    async fn is_running(&self) -> bool;
}

/// Composite-disk lifecycle hooks.
///
/// Hook failures are logged by the caller, never propagated: the disk has
/// already transitioned by the time a hook runs.
#[async_trait]
pub trait DiskHooks: Send + Sync {
    async fn post_create(&self, disk: &CompositeDiskInfo) -> Result<(), TdiskError>;

    async fn pre_remove(&self, disk: &CompositeDiskInfo) -> Result<(), TdiskError>;
}
