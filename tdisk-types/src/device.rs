//! Composite-disk and member-device data models
//!
//! These types mirror what the external block driver reports through its
//! control interface. The registry re-queries the driver on every call, so
//! none of these carry authoritative state of their own.

use serde::{Deserialize, Serialize};

/// Index of a member device inside its owning composite disk.
///
/// Stable for the lifetime of the attachment and unique within the disk.
pub type DeviceId = u32;

/// Backend kind of one member device.
///
/// A closed set: new backend kinds are added by extending this enum and the
/// worker capability trait, not by subclassing an open hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// A whole raw block device (e.g. /dev/sdb)
    RawDevice,

    /// A partition of a block device
    Partition,

    /// A store served by an out-of-process plugin worker
    PluginBacked,
}

impl DeviceKind {
    /// Partitions share spindles/queues with their siblings; the advisor
    /// treats them as non-redundant placement targets.
    pub fn is_partitioned(self) -> bool {
        matches!(self, DeviceKind::Partition)
    }
}

/// One backing store participating in a composite disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable id within the owning composite disk
    pub id: DeviceId,

    /// Human-readable name (device path or plugin name)
    pub name: String,

    /// Backend kind
    pub kind: DeviceKind,

    /// Capacity in bytes, always a whole multiple of `blocksize`
    pub capacity: u64,

    /// Blocksize in bytes (shared with the owning composite disk)
    pub blocksize: u32,

    /// Cumulative bytes read since attachment (historical, never reset)
    pub bytes_read: u64,

    /// Cumulative bytes written since attachment (historical, never reset)
    pub bytes_written: u64,

    /// Resettable access counter
    pub access_count: u64,

    /// Whether the device is flagged as redundant storage
    pub redundant: bool,
}

impl Device {
    /// Capacity in whole blocks
    pub fn block_count(&self) -> u64 {
        self.capacity / u64::from(self.blocksize)
    }
}

/// A named, minor-numbered virtual device owning an ordered list of members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDiskInfo {
    /// Driver minor number
    pub minor: u32,

    /// Device name (e.g. "td0")
    pub name: String,

    /// Blocksize in bytes, fixed at creation
    pub blocksize: u32,

    /// Total logical sectors served by this disk
    pub max_sectors: u64,

    /// Online only if every member device is reachable
    pub online: bool,
}

/// The resolved physical location of one logical sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorIndex {
    /// The member device where the logical sector is stored
    pub device: DeviceId,

    /// The physical sector on that device
    pub sector: u64,
}

/// Bulk-query element: a logical sector together with its resolved location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorInfo {
    pub logical_sector: u64,
    pub physical: SectorIndex,

    /// Access count of the physical sector since the last counter reset
    pub access_count: u16,

    /// Whether the physical sector currently holds data
    pub used: bool,
}

/// One measurement epoch for one member device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    /// Driver-assigned sequence id, monotonically increasing
    pub sequence: u64,

    /// Measured throughput in MB/s
    pub throughput: f64,
}

/// Snapshot returned by the driver's debug interface: all throughput
/// samples recorded since a given sequence id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugInfo {
    /// Highest sequence id contained in `samples`
    pub latest_sequence: u64,

    /// New samples, grouped by member device
    pub samples: Vec<(DeviceId, PerformanceSample)>,
}
