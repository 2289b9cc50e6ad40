// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use tdisk_advisor::AdvisorConfig;
use tdisk_history::HistoryConfig;

/// Daemon configuration, loaded from a TOML file. Every section falls
/// back to defaults so a missing or empty file is a valid deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub driver: DriverSection,
    pub history: HistoryConfig,
    pub advisor: AdvisorConfig,
    pub plugins: PluginSection,
    pub sampler: SamplerSection,
    pub hooks: HooksSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSection {
    /// Control device of the external driver
    pub control_path: PathBuf,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            control_path: PathBuf::from("/dev/td-control"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSection {
    pub poll_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for PluginSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            probe_timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerSection {
    pub interval_ms: u64,
}

impl Default for SamplerSection {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

/// Executables fired on composite-disk lifecycle transitions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksSection {
    pub post_create: Option<PathBuf>,
    pub pre_remove: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(?path, "no configuration file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration {path:?}"))?;
        toml::from_str(&raw).with_context(|| format!("parsing configuration {path:?}"))
    }
}

impl PluginSection {
    pub fn supervisor(&self) -> tdisk_plugin::SupervisorConfig {
        tdisk_plugin::SupervisorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        }
    }
}
