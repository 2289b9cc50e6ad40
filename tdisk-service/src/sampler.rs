// SPDX-License-Identifier: GPL-3.0-only

//! Background performance sampler.
//!
//! Periodically drains the driver's debug feed into the history store.
//! One cursor per composite disk remembers the last consumed sequence id
//! so a sample is recorded exactly once. Disks that are offline or gone
//! are skipped for the round; sampling must never take the daemon down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tdisk_contracts::{DriverControl, TdiskError, TdiskErrorKind};
use tdisk_history::{DeviceKey, HistoryStore};

pub struct Sampler {
    driver: Arc<dyn DriverControl>,
    history: Arc<HistoryStore>,
    interval: Duration,
    cursors: HashMap<u32, u64>,
}

impl Sampler {
    pub fn new(driver: Arc<dyn DriverControl>, history: Arc<HistoryStore>, interval: Duration) -> Self {
        Self {
            driver,
            history,
            interval,
            cursors: HashMap::new(),
        }
    }

    /// One sampling round over every known composite disk
    pub async fn sample_once(&mut self) {
        let minors = match self.driver.list().await {
            Ok(minors) => minors,
            Err(error) => {
                tracing::warn!(%error, "cannot enumerate composite disks");
                return;
            }
        };

        self.cursors.retain(|minor, _| minors.contains(minor));

        for minor in minors {
            let since = self.cursors.get(&minor).copied().unwrap_or(0);
            match self.driver.debug_info(minor, since).await {
                Ok(debug) => {
                    for (device, sample) in &debug.samples {
                        self.history.record(DeviceKey::new(minor, *device), *sample);
                    }
                    self.cursors.insert(minor, debug.latest_sequence);
                }
                Err(TdiskError { kind, .. })
                    if matches!(
                        kind,
                        TdiskErrorKind::DeviceOffline
                            | TdiskErrorKind::Unavailable
                            | TdiskErrorKind::NotFound
                    ) =>
                {
                    tracing::debug!(minor, "skipping unreachable disk this round");
                }
                Err(error) => {
                    tracing::warn!(minor, %error, "debug-info query failed");
                }
            }
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sample_once().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tdisk_history::HistoryConfig;
    use tdisk_testing::{FakeDriver, member_device, sample};

    #[tokio::test]
    async fn samples_are_recorded_exactly_once() {
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(0, 4096, vec![member_device(0, 8 << 20, 4096)]);
        driver.push_sample(0, 0, sample(1, 100.0));
        driver.push_sample(0, 0, sample(2, 200.0));

        let history = Arc::new(HistoryStore::new(HistoryConfig { capacity: 8 }).unwrap());
        let mut sampler = Sampler::new(
            Arc::clone(&driver) as Arc<dyn DriverControl>,
            Arc::clone(&history),
            Duration::from_millis(10),
        );

        sampler.sample_once().await;
        sampler.sample_once().await;
        assert_eq!(history.snapshot(DeviceKey::new(0, 0)).len(), 2);

        driver.push_sample(0, 0, sample(3, 300.0));
        sampler.sample_once().await;

        let window = history.snapshot(DeviceKey::new(0, 0));
        assert_eq!(window.len(), 3);
        assert_eq!(window.last().unwrap().sequence, 3);
        assert_eq!(history.average(DeviceKey::new(0, 0)), Some(200.0));
    }

    #[tokio::test]
    async fn offline_disks_do_not_abort_the_round() {
        let driver = Arc::new(FakeDriver::new());
        driver.add_disk(0, 4096, vec![member_device(0, 8 << 20, 4096)]);
        driver.add_disk(1, 4096, vec![member_device(0, 8 << 20, 4096)]);
        driver.push_sample(1, 0, sample(1, 80.0));

        let history = Arc::new(HistoryStore::new(HistoryConfig { capacity: 8 }).unwrap());
        let mut sampler = Sampler::new(
            Arc::clone(&driver) as Arc<dyn DriverControl>,
            Arc::clone(&history),
            Duration::from_millis(10),
        );

        driver.set_online(0, false);
        sampler.sample_once().await;

        assert_eq!(history.snapshot(DeviceKey::new(1, 0)).len(), 1);
    }
}
