// SPDX-License-Identifier: GPL-3.0-only

use tdisk_types::{CandidateDevice, Device, DeviceId, DeviceKind, PerformanceSample};

/// A partition-backed member device with zeroed counters
pub fn member_device(id: DeviceId, capacity: u64, blocksize: u32) -> Device {
    Device {
        id,
        name: format!("/dev/sdb{}", id + 1),
        kind: DeviceKind::Partition,
        capacity,
        blocksize,
        bytes_read: 0,
        bytes_written: 0,
        access_count: 0,
        redundant: false,
    }
}

/// An unattached raw-device candidate for advisor tests
pub fn candidate(name: &str, capacity: u64) -> CandidateDevice {
    CandidateDevice {
        name: name.to_string(),
        kind: DeviceKind::RawDevice,
        capacity,
        redundant: false,
    }
}

/// A throughput sample with the given sequence id
pub fn sample(sequence: u64, throughput: f64) -> PerformanceSample {
    PerformanceSample {
        sequence,
        throughput,
    }
}
