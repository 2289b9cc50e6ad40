// SPDX-License-Identifier: GPL-3.0-only

//! Lifecycle hook dispatch.
//!
//! Hooks are external executables invoked with the affected disk's minor
//! number and device name. The disk has already transitioned when a hook
//! runs, so failures are reported to the caller for logging but never
//! roll anything back.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;

use tdisk_contracts::{DiskHooks, TdiskError};
use tdisk_types::CompositeDiskInfo;

use crate::config::HooksSection;

pub struct ScriptHooks {
    post_create: Option<PathBuf>,
    pre_remove: Option<PathBuf>,
}

impl ScriptHooks {
    pub fn new(section: &HooksSection) -> Self {
        Self {
            post_create: section.post_create.clone(),
            pre_remove: section.pre_remove.clone(),
        }
    }

    async fn run(script: &PathBuf, disk: &CompositeDiskInfo) -> Result<(), TdiskError> {
        let status = Command::new(script)
            .arg(disk.minor.to_string())
            .arg(&disk.name)
            .status()
            .await
            .map_err(|error| {
                TdiskError::internal(format!("spawning hook {script:?}: {error}"))
            })?;

        if !status.success() {
            return Err(TdiskError::internal(format!(
                "hook {script:?} exited with {status}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DiskHooks for ScriptHooks {
    async fn post_create(&self, disk: &CompositeDiskInfo) -> Result<(), TdiskError> {
        match &self.post_create {
            Some(script) => Self::run(script, disk).await,
            None => Ok(()),
        }
    }

    async fn pre_remove(&self, disk: &CompositeDiskInfo) -> Result<(), TdiskError> {
        match &self.pre_remove {
            Some(script) => Self::run(script, disk).await,
            None => Ok(()),
        }
    }
}
