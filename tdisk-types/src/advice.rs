//! Advisory records
//!
//! Everything in this module is transient: regenerated on each advisory
//! run, never mutated in place and never persisted across restarts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::common::ByteRange;
use crate::device::{DeviceId, DeviceKind};

/// Redundancy classification of a candidate combination.
///
/// Combinations mixing redundant and non-redundant members are rejected
/// during enumeration, so a classification is always homogeneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedundancyClass {
    Redundant,
    NonRedundant,
}

/// One currently-unattached device offered to the advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateDevice {
    pub name: String,
    pub kind: DeviceKind,
    pub capacity: u64,
    pub redundant: bool,
}

/// An unordered selection of candidate devices plus the parameters a new
/// composite disk would be created with. Used only transiently during
/// scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCombination {
    pub devices: Vec<CandidateDevice>,
    pub blocksize: u32,
    pub cache_percent: u8,
}

impl DeviceCombination {
    /// Aggregate capacity of all members
    pub fn capacity(&self) -> u64 {
        self.devices.iter().map(|d| d.capacity).sum()
    }
}

/// Ranked advisor output for a new composite disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TDiskAdvice {
    pub combination: DeviceCombination,
    pub score: f64,
    pub capacity_estimate: u64,
    pub redundancy: RedundancyClass,
}

/// A recommendation to move one file to a different member device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAssignment {
    /// Path of the file, as discovered by the correlator
    pub path: PathBuf,

    /// The member device currently holding the file's bytes
    pub current_device: DeviceId,

    /// Logical sector span occupied by the file
    pub sector_range: ByteRange,

    /// The member device the file should move to
    pub target_device: DeviceId,

    /// Estimated throughput gain in MB/s; always positive when moving helps
    pub improvement: f64,
}

/// The estimated improvement for one file within a summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilePerformanceImprovement {
    pub path: PathBuf,
    pub improvement: f64,
}

/// Aggregated rebalancing summary for one composite disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TDiskPerformanceImprovement {
    /// Sum of the per-file improvement estimates, in MB/s
    pub total_improvement: f64,

    /// All files involved in the improvement
    pub files: Vec<FilePerformanceImprovement>,
}

impl TDiskPerformanceImprovement {
    /// Adds a file to the performance improvement
    pub fn add_file(&mut self, path: PathBuf, improvement: f64) {
        self.total_improvement += improvement;
        self.files.push(FilePerformanceImprovement { path, improvement });
    }
}
