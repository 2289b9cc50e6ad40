// SPDX-License-Identifier: GPL-3.0-only

//! Ioctl adapter for the external tDisk kernel driver.
//!
//! The driver owns striping, topology and counters; this adapter only
//! marshals its control ABI into the [`DriverControl`] contract. Disk
//! discovery scans /dev for `td<N>` nodes, creation and removal go
//! through the control node, everything else through the per-disk node.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use async_trait::async_trait;

use tdisk_contracts::{DriverControl, MemberSpec, TdiskError};
use tdisk_types::{
    CompositeDiskInfo, DebugInfo, Device, DeviceId, DeviceKind, PerformanceSample, SectorIndex,
    SectorInfo,
};

mod ffi {
    pub const MAX_NAME: usize = 256;
    pub const SECTOR_BATCH: usize = 256;
    pub const SAMPLE_BATCH: usize = 128;

    pub const KIND_RAW: u32 = 0;
    pub const KIND_PARTITION: u32 = 1;
    pub const KIND_PLUGIN: u32 = 2;

    #[repr(C)]
    pub struct AddParams {
        pub blocksize: u32,
        pub minor: i32,
    }

    #[repr(C)]
    pub struct AddDiskParams {
        pub kind: u32,
        pub redundant: u32,
        pub name: [u8; MAX_NAME],
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct SectorIndexRaw {
        pub disk: u32,
        pub sector: u64,
        pub access_count: u16,
        pub used: u8,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct SectorInfoRaw {
        pub logical_sector: u64,
        pub physical: SectorIndexRaw,
    }

    #[repr(C)]
    pub struct SectorBatch {
        pub start: u64,
        pub count: u32,
        pub entries: [SectorInfoRaw; SECTOR_BATCH],
    }

    #[repr(C)]
    pub struct InternalDeviceInfoRaw {
        pub disk: u32,
        pub kind: u32,
        pub redundant: u8,
        pub name: [u8; MAX_NAME],
        pub capacity: u64,
        pub bytes_read: u64,
        pub bytes_written: u64,
        pub access_count: u64,
    }

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct DebugSampleRaw {
        pub disk: u32,
        pub sequence: u64,
        pub throughput_kbps: u32,
    }

    #[repr(C)]
    pub struct DebugBatch {
        pub since_sequence: u64,
        pub count: u32,
        pub samples: [DebugSampleRaw; SAMPLE_BATCH],
    }

    nix::ioctl_readwrite!(td_add, b'T', 0, AddParams);
    nix::ioctl_write_ptr!(td_remove, b'T', 1, u32);
    nix::ioctl_write_ptr!(td_add_disk, b'T', 2, AddDiskParams);
    nix::ioctl_read!(td_get_blocksize, b'T', 3, u32);
    nix::ioctl_read!(td_get_max_sectors, b'T', 4, u64);
    nix::ioctl_readwrite!(td_get_sector_index, b'T', 5, SectorInfoRaw);
    nix::ioctl_readwrite!(td_get_all_sector_indices, b'T', 6, SectorBatch);
    nix::ioctl_read!(td_get_devices_count, b'T', 7, u32);
    nix::ioctl_readwrite!(td_get_device_info, b'T', 8, InternalDeviceInfoRaw);
    nix::ioctl_none!(td_clear_access_count, b'T', 9);
    nix::ioctl_readwrite!(td_get_debug_info, b'T', 10, DebugBatch);
    nix::ioctl_read!(td_is_online, b'T', 11, u8);
}

pub struct IoctlDriver {
    control_path: PathBuf,
}

impl IoctlDriver {
    pub fn new(control_path: impl Into<PathBuf>) -> Self {
        Self {
            control_path: control_path.into(),
        }
    }

    fn open_control(&self) -> Result<File, TdiskError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.control_path)
            .map_err(|error| {
                TdiskError::unavailable(format!(
                    "driver control node {:?}: {error}",
                    self.control_path
                ))
            })
    }

    fn open_disk(minor: u32) -> Result<File, TdiskError> {
        let path = disk_path(minor);
        OpenOptions::new()
            .read(true)
            .open(&path)
            .map_err(|error| match error.kind() {
                std::io::ErrorKind::NotFound => {
                    TdiskError::not_found(format!("no composite disk at {path:?}"))
                }
                _ => TdiskError::unavailable(format!("opening {path:?}: {error}")),
            })
    }
}

fn disk_path(minor: u32) -> PathBuf {
    PathBuf::from(format!("/dev/td{minor}"))
}

/// Parses the minor number out of a /dev entry name like "td3"
fn parse_minor(name: &str) -> Option<u32> {
    name.strip_prefix("td")
        .filter(|suffix| !suffix.is_empty())
        .and_then(|suffix| suffix.parse().ok())
}

fn fill_name(target: &mut [u8; ffi::MAX_NAME], name: &str) -> Result<(), TdiskError> {
    let bytes = name.as_bytes();
    if bytes.len() >= ffi::MAX_NAME {
        return Err(TdiskError::invalid(format!(
            "member name {name:?} exceeds {} bytes",
            ffi::MAX_NAME - 1
        )));
    }
    target[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn name_from(raw: &[u8; ffi::MAX_NAME]) -> String {
    let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn kind_to_raw(kind: DeviceKind) -> u32 {
    match kind {
        DeviceKind::RawDevice => ffi::KIND_RAW,
        DeviceKind::Partition => ffi::KIND_PARTITION,
        DeviceKind::PluginBacked => ffi::KIND_PLUGIN,
    }
}

fn kind_from_raw(kind: u32) -> DeviceKind {
    match kind {
        ffi::KIND_PARTITION => DeviceKind::Partition,
        ffi::KIND_PLUGIN => DeviceKind::PluginBacked,
        _ => DeviceKind::RawDevice,
    }
}

fn ioctl_error(operation: &str, minor: u32, errno: nix::errno::Errno) -> TdiskError {
    match errno {
        nix::errno::Errno::ENODEV => {
            TdiskError::offline(format!("td{minor} is offline ({operation})"))
        }
        nix::errno::Errno::ERANGE => {
            TdiskError::out_of_range(format!("{operation} on td{minor} out of range"))
        }
        _ => TdiskError::internal(format!("{operation} on td{minor}: {errno}")),
    }
}

#[async_trait]
impl DriverControl for IoctlDriver {
    async fn create(
        &self,
        minor: Option<u32>,
        blocksize: u32,
        members: Vec<MemberSpec>,
    ) -> Result<CompositeDiskInfo, TdiskError> {
        if members.is_empty() {
            return Err(TdiskError::invalid("a composite disk needs members"));
        }

        let control = self.open_control()?;
        let mut params = ffi::AddParams {
            blocksize,
            minor: minor.map(|minor| minor as i32).unwrap_or(-1),
        };

        unsafe { ffi::td_add(control.as_raw_fd(), &mut params) }
            .map_err(|errno| TdiskError::internal(format!("creating composite disk: {errno}")))?;
        let minor = params.minor as u32;

        let disk = Self::open_disk(minor)?;
        for member in &members {
            let mut add = ffi::AddDiskParams {
                kind: kind_to_raw(member.kind),
                redundant: u32::from(member.redundant),
                name: [0; ffi::MAX_NAME],
            };
            fill_name(&mut add.name, &member.name)?;

            unsafe { ffi::td_add_disk(disk.as_raw_fd(), &add) }
                .map_err(|errno| ioctl_error("add-disk", minor, errno))?;
        }

        self.disk_info(minor).await
    }

    async fn remove(&self, minor: u32) -> Result<(), TdiskError> {
        let control = self.open_control()?;
        unsafe { ffi::td_remove(control.as_raw_fd(), &minor) }
            .map_err(|errno| ioctl_error("remove", minor, errno))?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<u32>, TdiskError> {
        let entries = std::fs::read_dir("/dev")
            .map_err(|error| TdiskError::internal(format!("reading /dev: {error}")))?;

        let mut minors: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_minor(&entry.file_name().to_string_lossy()))
            .collect();
        minors.sort_unstable();
        Ok(minors)
    }

    async fn disk_info(&self, minor: u32) -> Result<CompositeDiskInfo, TdiskError> {
        let disk = Self::open_disk(minor)?;

        let mut blocksize = 0u32;
        unsafe { ffi::td_get_blocksize(disk.as_raw_fd(), &mut blocksize) }
            .map_err(|errno| ioctl_error("get-blocksize", minor, errno))?;

        let mut max_sectors = 0u64;
        unsafe { ffi::td_get_max_sectors(disk.as_raw_fd(), &mut max_sectors) }
            .map_err(|errno| ioctl_error("get-max-sectors", minor, errno))?;

        let mut online = 0u8;
        unsafe { ffi::td_is_online(disk.as_raw_fd(), &mut online) }
            .map_err(|errno| ioctl_error("is-online", minor, errno))?;

        Ok(CompositeDiskInfo {
            minor,
            name: format!("td{minor}"),
            blocksize,
            max_sectors,
            online: online != 0,
        })
    }

    async fn size_bytes(&self, minor: u32) -> Result<u64, TdiskError> {
        let info = self.disk_info(minor).await?;
        Ok(info.max_sectors * u64::from(info.blocksize))
    }

    async fn blocksize(&self, minor: u32) -> Result<u32, TdiskError> {
        Ok(self.disk_info(minor).await?.blocksize)
    }

    async fn max_sectors(&self, minor: u32) -> Result<u64, TdiskError> {
        Ok(self.disk_info(minor).await?.max_sectors)
    }

    async fn sector_index(
        &self,
        minor: u32,
        logical_sector: u64,
    ) -> Result<SectorIndex, TdiskError> {
        let disk = Self::open_disk(minor)?;

        let mut raw: ffi::SectorInfoRaw = unsafe { std::mem::zeroed() };
        raw.logical_sector = logical_sector;

        unsafe { ffi::td_get_sector_index(disk.as_raw_fd(), &mut raw) }
            .map_err(|errno| ioctl_error("get-sector-index", minor, errno))?;

        Ok(SectorIndex {
            device: raw.physical.disk,
            sector: raw.physical.sector,
        })
    }

    async fn all_sector_indices(&self, minor: u32) -> Result<Vec<SectorInfo>, TdiskError> {
        let disk = Self::open_disk(minor)?;
        let max_sectors = self.max_sectors(minor).await?;

        let mut infos = Vec::with_capacity(max_sectors as usize);
        let mut start = 0u64;

        while start < max_sectors {
            let mut batch: ffi::SectorBatch = unsafe { std::mem::zeroed() };
            batch.start = start;
            batch.count = ffi::SECTOR_BATCH as u32;

            unsafe { ffi::td_get_all_sector_indices(disk.as_raw_fd(), &mut batch) }
                .map_err(|errno| ioctl_error("get-all-sector-indices", minor, errno))?;

            if batch.count == 0 {
                break;
            }

            for raw in &batch.entries[..batch.count as usize] {
                infos.push(SectorInfo {
                    logical_sector: raw.logical_sector,
                    physical: SectorIndex {
                        device: raw.physical.disk,
                        sector: raw.physical.sector,
                    },
                    access_count: raw.physical.access_count,
                    used: raw.physical.used != 0,
                });
            }

            start += u64::from(batch.count);
        }

        Ok(infos)
    }

    async fn device_info(&self, minor: u32, device: DeviceId) -> Result<Device, TdiskError> {
        let disk = Self::open_disk(minor)?;
        let blocksize = self.blocksize(minor).await?;

        let mut raw: ffi::InternalDeviceInfoRaw = unsafe { std::mem::zeroed() };
        raw.disk = device;

        unsafe { ffi::td_get_device_info(disk.as_raw_fd(), &mut raw) }
            .map_err(|errno| ioctl_error("get-device-info", minor, errno))?;

        Ok(Device {
            id: device,
            name: name_from(&raw.name),
            kind: kind_from_raw(raw.kind),
            capacity: raw.capacity,
            blocksize,
            bytes_read: raw.bytes_read,
            bytes_written: raw.bytes_written,
            access_count: raw.access_count,
            redundant: raw.redundant != 0,
        })
    }

    async fn device_count(&self, minor: u32) -> Result<u32, TdiskError> {
        let disk = Self::open_disk(minor)?;

        let mut count = 0u32;
        unsafe { ffi::td_get_devices_count(disk.as_raw_fd(), &mut count) }
            .map_err(|errno| ioctl_error("get-devices-count", minor, errno))?;
        Ok(count)
    }

    async fn clear_access_count(&self, minor: u32) -> Result<(), TdiskError> {
        let disk = Self::open_disk(minor)?;
        unsafe { ffi::td_clear_access_count(disk.as_raw_fd()) }
            .map_err(|errno| ioctl_error("clear-access-count", minor, errno))?;
        Ok(())
    }

    async fn debug_info(&self, minor: u32, since_sequence: u64) -> Result<DebugInfo, TdiskError> {
        let disk = Self::open_disk(minor)?;

        let mut batch: ffi::DebugBatch = unsafe { std::mem::zeroed() };
        batch.since_sequence = since_sequence;
        batch.count = ffi::SAMPLE_BATCH as u32;

        unsafe { ffi::td_get_debug_info(disk.as_raw_fd(), &mut batch) }
            .map_err(|errno| ioctl_error("get-debug-info", minor, errno))?;

        let samples: Vec<(DeviceId, PerformanceSample)> = batch.samples
            [..batch.count as usize]
            .iter()
            .map(|raw| {
                (
                    raw.disk,
                    PerformanceSample {
                        sequence: raw.sequence,
                        throughput: f64::from(raw.throughput_kbps) / 1024.0,
                    },
                )
            })
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
    }
}
