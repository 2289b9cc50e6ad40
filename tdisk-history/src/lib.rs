// SPDX-License-Identifier: GPL-3.0-only

//! Bounded per-device performance history.
//!
//! Each member device gets a fixed-capacity ring buffer of
//! [`PerformanceSample`]s, created lazily on first record. Once full, a new
//! sample overwrites the oldest one, so the store always holds the most
//! recent window. Capacity is a power of two, the same for every device,
//! so the overwrite is a cheap index-wrap.
//!
//! One writer (the sampler) and any number of readers (advisor, UI) may
//! run concurrently; an append is a single locked slot write plus index
//! advance, so readers observe either the pre- or post-append window,
//! never a torn sample.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use tdisk_contracts::TdiskError;
use tdisk_types::{DeviceId, PerformanceSample};

/// Identifies one member device across all composite disks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceKey {
    pub minor: u32,
    pub device: DeviceId,
}

impl DeviceKey {
    pub fn new(minor: u32, device: DeviceId) -> Self {
        Self { minor, device }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Retained samples per device; must be a power of two
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

struct RingBuffer {
    slots: Vec<PerformanceSample>,
    /// Total number of appends; the next slot is `head & (capacity - 1)`
    head: u64,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            head: 0,
        }
    }

    fn push(&mut self, capacity: usize, sample: PerformanceSample) {
        let slot = (self.head & (capacity as u64 - 1)) as usize;
        if self.slots.len() < capacity {
            self.slots.push(sample);
        } else {
            self.slots[slot] = sample;
        }
        self.head += 1;
    }

    fn window(&self, capacity: usize) -> Vec<PerformanceSample> {
        if self.head <= capacity as u64 {
            return self.slots.clone();
        }

        let oldest = (self.head & (capacity as u64 - 1)) as usize;
        let mut out = Vec::with_capacity(capacity);
        out.extend_from_slice(&self.slots[oldest..]);
        out.extend_from_slice(&self.slots[..oldest]);
        out
    }
}

struct Inner {
    buffers: HashMap<DeviceKey, RingBuffer>,
    retired: HashSet<DeviceKey>,
}

/// Process-scoped store of performance history, shared by the sampler and
/// all advisory readers.
pub struct HistoryStore {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl HistoryStore {
    pub fn new(config: HistoryConfig) -> Result<Self, TdiskError> {
        if config.capacity == 0 || !config.capacity.is_power_of_two() {
            return Err(TdiskError::invalid(format!(
                "history capacity must be a power of two, got {}",
                config.capacity
            )));
        }

        Ok(Self {
            capacity: config.capacity,
            inner: RwLock::new(Inner {
                buffers: HashMap::new(),
                retired: HashSet::new(),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a sample, creating the device's ring buffer lazily on first
    /// use. Samples for retired devices are dropped silently: sampling and
    /// device removal may race, and that race is not an error.
    pub fn record(&self, device: DeviceKey, sample: PerformanceSample) {
        let mut inner = self.inner.write().expect("history lock poisoned");

        if inner.retired.contains(&device) {
            tracing::debug!(?device, "dropping sample for retired device");
            return;
        }

        let capacity = self.capacity;
        inner
            .buffers
            .entry(device)
            .or_insert_with(|| RingBuffer::new(capacity))
            .push(capacity, sample);
    }

    /// Drops a device's history and refuses further samples for it.
    /// Called when the device is detached from its composite disk.
    pub fn forget(&self, device: DeviceKey) {
        let mut inner = self.inner.write().expect("history lock poisoned");
        inner.buffers.remove(&device);
        inner.retired.insert(device);
    }

    /// Clears the retired mark, letting a re-attached device record again.
    pub fn readmit(&self, device: DeviceKey) {
        let mut inner = self.inner.write().expect("history lock poisoned");
        inner.retired.remove(&device);
    }

    /// The currently retained window, oldest first. Empty for unknown
    /// devices; there is no error path.
    pub fn snapshot(&self, device: DeviceKey) -> Vec<PerformanceSample> {
        let inner = self.inner.read().expect("history lock poisoned");
        inner
            .buffers
            .get(&device)
            .map(|ring| ring.window(self.capacity))
            .unwrap_or_default()
    }

    /// Arithmetic mean of the current window, or `None` when no samples
    /// have been recorded.
    pub fn average(&self, device: DeviceKey) -> Option<f64> {
        let inner = self.inner.read().expect("history lock poisoned");
        let ring = inner.buffers.get(&device)?;

        if ring.slots.is_empty() {
            return None;
        }

        let sum: f64 = ring.slots.iter().map(|sample| sample.throughput).sum();
        Some(sum / ring.slots.len() as f64)
    }

    /// Devices with at least one retained sample
    pub fn tracked_devices(&self) -> Vec<DeviceKey> {
        let inner = self.inner.read().expect("history lock poisoned");
        inner.buffers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sequence: u64, throughput: f64) -> PerformanceSample {
        PerformanceSample {
            sequence,
            throughput,
        }
    }

    fn store(capacity: usize) -> HistoryStore {
        HistoryStore::new(HistoryConfig { capacity }).unwrap()
    }

    #[test]
    fn rejects_non_power_of_two_capacity() {
        assert!(HistoryStore::new(HistoryConfig { capacity: 0 }).is_err());
        assert!(HistoryStore::new(HistoryConfig { capacity: 48 }).is_err());
        assert!(HistoryStore::new(HistoryConfig { capacity: 64 }).is_ok());
    }

    #[test]
    fn snapshot_keeps_last_capacity_samples_in_order() {
        let store = store(8);
        let device = DeviceKey::new(0, 1);

        for sequence in 0..20 {
            store.record(device, sample(sequence, sequence as f64));
        }

        let window = store.snapshot(device);
        assert_eq!(window.len(), 8);
        let sequences: Vec<u64> = window.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, (12..20).collect::<Vec<u64>>());
    }

    #[test]
    fn snapshot_before_wrap_is_in_insertion_order() {
        let store = store(8);
        let device = DeviceKey::new(0, 1);

        for sequence in 0..5 {
            store.record(device, sample(sequence, 100.0));
        }

        let window = store.snapshot(device);
        let sequences: Vec<u64> = window.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn unknown_device_yields_empty_window_and_no_average() {
        let store = store(8);
        let device = DeviceKey::new(0, 9);

        assert!(store.snapshot(device).is_empty());
        assert_eq!(store.average(device), None);
    }

    #[test]
    fn average_over_window() {
        let store = store(4);
        let device = DeviceKey::new(1, 0);

        store.record(device, sample(0, 100.0));
        store.record(device, sample(1, 200.0));

        assert_eq!(store.average(device), Some(150.0));
    }

    #[test]
    fn average_uses_only_the_retained_window() {
        let store = store(2);
        let device = DeviceKey::new(1, 0);

        store.record(device, sample(0, 1000.0));
        store.record(device, sample(1, 100.0));
        store.record(device, sample(2, 200.0));

        assert_eq!(store.average(device), Some(150.0));
    }

    #[test]
    fn retired_device_drops_samples_silently() {
        let store = store(8);
        let device = DeviceKey::new(0, 2);

        store.record(device, sample(0, 50.0));
        store.forget(device);
        store.record(device, sample(1, 50.0));

        assert!(store.snapshot(device).is_empty());

        store.readmit(device);
        store.record(device, sample(2, 75.0));
        assert_eq!(store.snapshot(device).len(), 1);
    }

    #[test]
    fn concurrent_writer_and_readers() {
        use std::sync::Arc;

        let store = Arc::new(store(64));
        let device = DeviceKey::new(0, 0);

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for sequence in 0..10_000 {
                    store.record(device, sample(sequence, 100.0));
                }
            })
        };

        let reader = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for _ in 0..1_000 {
                    let window = store.snapshot(device);
                    assert!(window.len() <= 64);
                    if let Some(average) = store.average(device) {
                        assert!((average - 100.0).abs() < f64::EPSILON);
                    }
                }
            })
        };

        writer.join().unwrap();
        reader.join().unwrap();
    }
}
