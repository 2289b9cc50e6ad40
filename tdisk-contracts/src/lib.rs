// SPDX-License-Identifier: GPL-3.0-only

//! Contracts between the advisory backend and its external collaborators:
//! the block driver control interface, the plugin worker capability set,
//! and the composite-disk lifecycle hooks. The error taxonomy shared by
//! all of them lives here as well.

pub mod error;
pub mod traits;

pub use error::{TdiskError, TdiskErrorKind};
pub use traits::{BlockWorker, DiskHooks, DriverControl, MemberSpec};
