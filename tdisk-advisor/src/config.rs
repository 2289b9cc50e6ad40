// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// Tunable advisory policy.
///
/// The scoring weights and the minimum-improvement threshold are policy,
/// not protocol; deployments tune them instead of the code hard-coding a
/// guessed formula.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Largest member count enumerated for new combinations. Bounded by
    /// the driver's supported maximum; keeps enumeration tractable.
    pub max_members: usize,

    /// Score contribution per GiB of aggregate capacity
    pub capacity_weight: f64,

    /// Flat score bonus for an all-redundant combination
    pub redundancy_weight: f64,

    /// Score contribution per MB/s of mean member throughput
    pub performance_weight: f64,

    /// Penalty per partitioned member (partitions share spindles)
    pub partition_penalty: f64,

    /// Minimum estimated gain (MB/s) before a file move is recommended
    pub min_improvement: f64,

    /// Blocksize proposed for new combinations
    pub default_blocksize: u32,

    /// Cache percentage proposed for new combinations
    pub cache_percent: u8,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            max_members: 4,
            capacity_weight: 1.0,
            redundancy_weight: 50.0,
            performance_weight: 2.0,
            partition_penalty: 10.0,
            min_improvement: 5.0,
            default_blocksize: 4096,
            cache_percent: 20,
        }
    }
}
