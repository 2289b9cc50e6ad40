// SPDX-License-Identifier: GPL-3.0-only

//! Intersection of a file's blocks with the resolved sector map.
//!
//! Answers "which member device currently holds this file's bytes" so
//! the advisor can pair occupancy with measured per-device performance.

use std::collections::HashMap;

use tdisk_types::{ByteRange, DeviceId, SectorInfo};

/// Per-device byte occupancy of one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceOccupancy {
    pub bytes_by_device: HashMap<DeviceId, u64>,

    /// Span of logical sectors the file touches (sector numbers, end
    /// exclusive)
    pub sector_range: Option<ByteRange>,
}

impl DeviceOccupancy {
    /// Total bytes attributed across all devices
    pub fn total_bytes(&self) -> u64 {
        self.bytes_by_device.values().sum()
    }

    /// The device holding the largest share of the file, ties broken by
    /// lower device id for determinism
    pub fn primary_device(&self) -> Option<DeviceId> {
        self.bytes_by_device
            .iter()
            .max_by(|left, right| left.1.cmp(right.1).then(right.0.cmp(left.0)))
            .map(|(device, _)| *device)
    }
}

/// Maps filesystem blocks onto the composite disk's logical sector space
/// and attributes the overlapping bytes to the owning member devices.
///
/// `sector_map` is the bulk-resolved logical sector list (ascending); it
/// is indexed by logical sector number.
pub fn occupancy(
    blocks: &[u64],
    fs_blocksize: u32,
    sector_map: &[SectorInfo],
    disk_blocksize: u32,
) -> DeviceOccupancy {
    let fs_blocksize = u64::from(fs_blocksize);
    let disk_blocksize = u64::from(disk_blocksize);

    let mut result = DeviceOccupancy::default();

    for &block in blocks {
        let byte_start = block * fs_blocksize;
        let byte_end = byte_start + fs_blocksize;

        let first_sector = byte_start / disk_blocksize;
        let last_sector = (byte_end - 1) / disk_blocksize;

        for sector in first_sector..=last_sector {
            let Some(info) = sector_map.get(sector as usize) else {
                continue;
            };

            let sector_start = sector * disk_blocksize;
            let sector_end = sector_start + disk_blocksize;
            let overlap = byte_end.min(sector_end) - byte_start.max(sector_start);

            *result
                .bytes_by_device
                .entry(info.physical.device)
                .or_insert(0) += overlap;

            result.sector_range = Some(match result.sector_range {
                Some(range) => ByteRange::new(range.start.min(sector), range.end.max(sector + 1)),
                None => ByteRange::new(sector, sector + 1),
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdisk_types::SectorIndex;

    fn map(entries: &[(u64, DeviceId)]) -> Vec<SectorInfo> {
        entries
            .iter()
            .map(|&(logical_sector, device)| SectorInfo {
                logical_sector,
                physical: SectorIndex {
                    device,
                    sector: logical_sector,
                },
                access_count: 0,
                used: true,
            })
            .collect()
    }

    #[test]
    fn blocks_attribute_to_their_devices() {
        // Sectors 0-1 on device 0, sectors 2-3 on device 1.
        let sector_map = map(&[(0, 0), (1, 0), (2, 1), (3, 1)]);

        let result = occupancy(&[0, 2], 4096, &sector_map, 4096);

        assert_eq!(result.bytes_by_device[&0], 4096);
        assert_eq!(result.bytes_by_device[&1], 4096);
        assert_eq!(result.sector_range, Some(ByteRange::new(0, 3)));
    }

    #[test]
    fn smaller_fs_blocks_split_one_sector() {
        // Two 2K filesystem blocks land in the same 4K sector.
        let sector_map = map(&[(0, 3)]);

        let result = occupancy(&[0, 1], 2048, &sector_map, 4096);

        assert_eq!(result.bytes_by_device[&3], 4096);
        assert_eq!(result.primary_device(), Some(3));
    }

    #[test]
    fn larger_fs_blocks_span_sectors_on_different_devices() {
        // One 8K filesystem block covers two 4K sectors on two devices.
        let sector_map = map(&[(0, 0), (1, 1)]);

        let result = occupancy(&[0], 8192, &sector_map, 4096);

        assert_eq!(result.bytes_by_device[&0], 4096);
        assert_eq!(result.bytes_by_device[&1], 4096);
    }

    #[test]
    fn primary_device_ties_break_low() {
        let sector_map = map(&[(0, 1), (1, 0)]);
        let result = occupancy(&[0, 1], 4096, &sector_map, 4096);

        assert_eq!(result.primary_device(), Some(0));
    }

    #[test]
    fn empty_block_list_is_empty_occupancy() {
        let result = occupancy(&[], 4096, &map(&[(0, 0)]), 4096);
        assert_eq!(result.total_bytes(), 0);
        assert_eq!(result.primary_device(), None);
        assert_eq!(result.sector_range, None);
    }
}
