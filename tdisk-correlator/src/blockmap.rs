// SPDX-License-Identifier: GPL-3.0-only

//! Filesystem block maps.
//!
//! `data_blocks` yields the filesystem-level blocks a file occupies, in
//! file-offset order. The production implementation asks the kernel for
//! the file's extents (FIEMAP, inode-based filesystems); `FakeBlockMap`
//! answers from synthetic data so unit tests run without a real disk.
//! Both satisfy the same contract.

use std::collections::HashMap;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tdisk_contracts::TdiskError;

use crate::walk::FileHandle;

pub trait BlockMap: Send + Sync {
    /// Blocks occupied by the file behind `handle`, in file-offset order.
    /// Directories own no data blocks here and yield an empty sequence.
    fn data_blocks(&self, handle: &FileHandle) -> Result<Vec<u64>, TdiskError>;

    /// Block size of the scanned filesystem in bytes
    fn blocksize(&self) -> u32;
}

mod ffi {
    pub const FIEMAP_FLAG_SYNC: u32 = 0x1;
    pub const FIEMAP_EXTENT_LAST: u32 = 0x1;
    pub const EXTENT_BATCH: usize = 64;

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct FiemapExtent {
        pub fe_logical: u64,
        pub fe_physical: u64,
        pub fe_length: u64,
        pub fe_reserved64: [u64; 2],
        pub fe_flags: u32,
        pub fe_reserved: [u32; 3],
    }

    #[repr(C)]
    pub struct FiemapRequest {
        pub fm_start: u64,
        pub fm_length: u64,
        pub fm_flags: u32,
        pub fm_mapped_extents: u32,
        pub fm_extent_count: u32,
        pub fm_reserved: u32,
        pub fm_extents: [FiemapExtent; EXTENT_BATCH],
    }

    nix::ioctl_readwrite!(fs_ioc_fiemap, b'f', 11, FiemapRequest);
}

/// Extent-based block map for inode filesystems (ext4 and friends)
pub struct FiemapBlockMap {
    blocksize: u32,
}

impl FiemapBlockMap {
    /// Probes the filesystem holding `root` for its block size
    pub fn open(root: &Path) -> Result<Self, TdiskError> {
        let stat = nix::sys::statvfs::statvfs(root)
            .map_err(|errno| TdiskError::internal(format!("statvfs {root:?}: {errno}")))?;

        let blocksize = stat.block_size() as u32;
        if blocksize == 0 {
            return Err(TdiskError::internal(format!(
                "filesystem at {root:?} reports zero block size"
            )));
        }

        Ok(Self { blocksize })
    }
}

impl BlockMap for FiemapBlockMap {
    fn data_blocks(&self, handle: &FileHandle) -> Result<Vec<u64>, TdiskError> {
        if handle.is_dir {
            return Ok(Vec::new());
        }

        let file = File::open(&handle.path).map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                TdiskError::not_found(format!("{:?} vanished during scan", handle.path))
            } else {
                TdiskError::internal(format!("open {:?}: {error}", handle.path))
            }
        })?;

        let blocksize = u64::from(self.blocksize);
        let mut blocks = Vec::new();
        let mut start = 0u64;

        loop {
            let mut request: ffi::FiemapRequest = unsafe { std::mem::zeroed() };
            request.fm_start = start;
            request.fm_length = u64::MAX - start;
            request.fm_flags = ffi::FIEMAP_FLAG_SYNC;
            request.fm_extent_count = ffi::EXTENT_BATCH as u32;

            unsafe { ffi::fs_ioc_fiemap(file.as_raw_fd(), &mut request) }.map_err(|errno| {
                TdiskError::internal(format!("FIEMAP on {:?}: {errno}", handle.path))
            })?;

            if request.fm_mapped_extents == 0 {
                break;
            }

            let mut saw_last = false;
            for extent in &request.fm_extents[..request.fm_mapped_extents as usize] {
                let first = extent.fe_physical / blocksize;
                let count = extent.fe_length.div_ceil(blocksize);
                blocks.extend(first..first + count);

                start = extent.fe_logical + extent.fe_length;
                if extent.fe_flags & ffi::FIEMAP_EXTENT_LAST != 0 {
                    saw_last = true;
                }
            }

            if saw_last {
                break;
            }
        }

        Ok(blocks)
    }

    fn blocksize(&self) -> u32 {
        self.blocksize
    }
}

/// Synthetic block map for unit tests.
///
/// Unknown files get a deterministic run of blocks derived from their
/// inode, so two scans of the same tree agree without any real extents.
pub struct FakeBlockMap {
    blocksize: u32,
    explicit: HashMap<PathBuf, Vec<u64>>,
}

impl FakeBlockMap {
    pub fn new(blocksize: u32) -> Self {
        Self {
            blocksize,
            explicit: HashMap::new(),
        }
    }

    /// Pins the exact blocks reported for one path
    pub fn insert(&mut self, path: impl Into<PathBuf>, blocks: Vec<u64>) {
        self.explicit.insert(path.into(), blocks);
    }
}

impl BlockMap for FakeBlockMap {
    fn data_blocks(&self, handle: &FileHandle) -> Result<Vec<u64>, TdiskError> {
        if handle.is_dir {
            return Ok(Vec::new());
        }

        if let Some(blocks) = self.explicit.get(&handle.path) {
            return Ok(blocks.clone());
        }

        let count = handle.size.div_ceil(u64::from(self.blocksize));
        let first = handle.inode * 1024;
        Ok((first..first + count).collect())
    }

    fn blocksize(&self) -> u32 {
        self.blocksize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn file_handle(path: &Path, size: u64, inode: u64) -> FileHandle {
        FileHandle {
            path: path.to_path_buf(),
            is_dir: false,
            size,
            inode,
        }
    }

    #[test]
    fn fake_map_is_deterministic() {
        let map = FakeBlockMap::new(4096);
        let handle = file_handle(Path::new("/mnt/a"), 10_000, 7);

        let first = map.data_blocks(&handle).unwrap();
        let second = map.data_blocks(&handle).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], 7 * 1024);
    }

    #[test]
    fn fake_map_prefers_pinned_blocks() {
        let mut map = FakeBlockMap::new(4096);
        map.insert("/mnt/a", vec![5, 6, 9]);

        let handle = file_handle(Path::new("/mnt/a"), 10_000, 7);
        assert_eq!(map.data_blocks(&handle).unwrap(), vec![5, 6, 9]);
    }

    #[test]
    fn directories_own_no_data_blocks() {
        let map = FakeBlockMap::new(4096);
        let handle = FileHandle {
            path: PathBuf::from("/mnt"),
            is_dir: true,
            size: 4096,
            inode: 2,
        };
        assert!(map.data_blocks(&handle).unwrap().is_empty());
    }

    #[test]
    fn fiemap_reports_blocks_for_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![0xA5u8; 64 * 1024]).unwrap();
        file.sync_all().unwrap();

        let map = match FiemapBlockMap::open(dir.path()) {
            Ok(map) => map,
            // Not every filesystem running the tests supports FIEMAP.
            Err(_) => return,
        };

        let metadata = std::fs::metadata(&path).unwrap();
        let handle = FileHandle {
            path: path.clone(),
            is_dir: false,
            size: metadata.len(),
            inode: std::os::unix::fs::MetadataExt::ino(&metadata),
        };

        if let Ok(blocks) = map.data_blocks(&handle) {
            let expected = metadata.len().div_ceil(u64::from(map.blocksize()));
            assert!(blocks.len() as u64 >= expected);
        }
    }
}
