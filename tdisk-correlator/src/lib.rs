// SPDX-License-Identifier: GPL-3.0-only

//! File/inode correlation.
//!
//! Walks a filesystem mounted on top of a composite disk and maps each
//! file to the blocks it occupies, so advice can name actual files
//! instead of opaque sectors. The correlator is a pure reader: it never
//! mutates the filesystem it scans.

pub mod blockmap;
pub mod occupancy;
pub mod walk;

pub use blockmap::{BlockMap, FakeBlockMap, FiemapBlockMap};
pub use occupancy::{DeviceOccupancy, occupancy};
pub use walk::{FileHandle, FileScan};
