// SPDX-License-Identifier: GPL-3.0-only

//! Test tooling shared by the tdisk crates: an in-memory stand-in for the
//! external block driver plus small fixture builders. Nothing here talks
//! to real hardware.

pub mod fake_driver;
pub mod fixtures;

pub use fake_driver::FakeDriver;
pub use fixtures::{candidate, member_device, sample};
