//! Canonical domain models for the tDisk advisory backend
//!
//! This crate defines the single source of truth for all composite-disk
//! domain types. These models are used throughout the stack:
//!
//! - **tdisk-registry**: Returns these types directly from its public API
//! - **tdisk-advisor**: Produces advice and rebalancing records from them
//! - **tdisk-service**: Serializes these types into `BackendResult` payloads
//!
//! ## Architecture
//!
//! Two families of types live here:
//!
//! ### Device topology (queried from the driver)
//! - `CompositeDiskInfo` → one virtual disk and its derived geometry
//! - `Device` → one member backing store with its counters
//! - `SectorIndex` / `SectorInfo` → resolved logical-to-physical locations
//!
//! ### Advisory records (recomputed on every run, never persisted)
//! - `TDiskAdvice` → a scored candidate member combination
//! - `FileAssignment` / `TDiskPerformanceImprovement` → rebalancing advice
//!
//! Every externally visible operation reports through [`BackendResult`]
//! rather than signaling success by absence of error alone.

pub mod advice;
pub mod common;
pub mod device;
pub mod result;

pub use advice::{
    CandidateDevice, DeviceCombination, FileAssignment, FilePerformanceImprovement,
    RedundancyClass, TDiskAdvice, TDiskPerformanceImprovement,
};
pub use common::{ByteRange, bytes_to_pretty};
pub use device::{
    CompositeDiskInfo, DebugInfo, Device, DeviceId, DeviceKind, PerformanceSample, SectorIndex,
    SectorInfo,
};
pub use result::{BackendResult, IndividualResult, ResultCategory, ResultKind};
