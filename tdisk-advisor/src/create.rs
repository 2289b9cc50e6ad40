// SPDX-License-Identifier: GPL-3.0-only

use std::sync::Arc;

use tdisk_contracts::{DiskHooks, DriverControl, MemberSpec, TdiskError};
use tdisk_types::{CompositeDiskInfo, TDiskAdvice};

/// Materializes a scored combination into a real composite disk.
///
/// The driver performs the creation; afterwards the post-create hook is
/// fired with the new disk. Hook failures are logged and swallowed — the
/// disk already exists by then.
pub async fn create_new_raid(
    driver: &Arc<dyn DriverControl>,
    hooks: &dyn DiskHooks,
    advice: &TDiskAdvice,
) -> Result<CompositeDiskInfo, TdiskError> {
    if advice.combination.devices.is_empty() {
        return Err(TdiskError::invalid("combination has no member devices"));
    }

    let members: Vec<MemberSpec> = advice
        .combination
        .devices
        .iter()
        .map(|device| MemberSpec {
            name: device.name.clone(),
            kind: device.kind,
            redundant: device.redundant,
        })
        .collect();

    let info = driver
        .create(None, advice.combination.blocksize, members)
        .await?;

    tracing::info!(
        minor = info.minor,
        members = advice.combination.devices.len(),
        score = advice.score,
        "created composite disk from advice"
    );

    if let Err(error) = hooks.post_create(&info).await {
        tracing::warn!(minor = info.minor, %error, "post-create hook failed");
    }

    Ok(info)
}
