// SPDX-License-Identifier: GPL-3.0-only

//! The advisor.
//!
//! Two independent algorithms share state but not code paths: scoring
//! candidate member combinations for a composite disk that does not
//! exist yet, and recommending file moves for one that does. Both read
//! the same performance history and sector mapper; neither publishes
//! partial results when a run is abandoned.

pub mod combinations;
pub mod config;
pub mod create;
pub mod rebalance;

pub use combinations::get_tdisk_advices;
pub use config::AdvisorConfig;
pub use create::create_new_raid;
pub use rebalance::{RebalancePlan, rebalance};
