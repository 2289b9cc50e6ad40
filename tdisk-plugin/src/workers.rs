// SPDX-License-Identifier: GPL-3.0-only

//! Built-in plugin workers.
//!
//! `NullWorker` is the discard store: fixed size, reads as zeros, writes
//! acknowledged and dropped. `MemWorker` keeps bytes in memory and is the
//! workhorse of the protocol tests; its liveness and latency are
//! switchable so supervision and coalescing behavior can be exercised
//! without a real remote backend.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use tdisk_contracts::{BlockWorker, TdiskError};

/// Discard store. Everything written to it is acknowledged and dropped.
pub struct NullWorker {
    name: String,
    size: u64,
}

impl NullWorker {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

#[async_trait]
impl BlockWorker for NullWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn size(&self) -> Result<u64, TdiskError> {
        Ok(self.size)
    }

    async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, TdiskError> {
        check_bounds(self.size, offset, length)?;
        Ok(vec![0u8; length])
    }

    async fn write(&self, offset: u64, data: Vec<u8>) -> Result<(), TdiskError> {
        check_bounds(self.size, offset, data.len())
    }

    async fn is_running(&self) -> bool {
        true
    }
}

/// In-memory store with switchable liveness and injectable read latency
pub struct MemWorker {
    name: String,
    bytes: Mutex<Vec<u8>>,
    running: AtomicBool,
    read_delay_ms: AtomicUsize,
    write_calls: AtomicUsize,
}

impl MemWorker {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            bytes: Mutex::new(vec![0u8; size]),
            running: AtomicBool::new(true),
            read_delay_ms: AtomicUsize::new(0),
            write_calls: AtomicUsize::new(0),
        }
    }

    /// Simulates a worker that stopped answering liveness probes
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    /// Number of write calls served so far; lets tests assert how many
    /// writes a drain actually issued.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockWorker for MemWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn size(&self) -> Result<u64, TdiskError> {
        Ok(self.bytes.lock().expect("mem worker lock poisoned").len() as u64)
    }

    async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, TdiskError> {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        let bytes = self.bytes.lock().expect("mem worker lock poisoned");
        check_bounds(bytes.len() as u64, offset, length)?;

        let start = offset as usize;
        Ok(bytes[start..start + length].to_vec())
    }

    async fn write(&self, offset: u64, data: Vec<u8>) -> Result<(), TdiskError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        let mut bytes = self.bytes.lock().expect("mem worker lock poisoned");
        check_bounds(bytes.len() as u64, offset, data.len())?;

        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(&data);
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn check_bounds(size: u64, offset: u64, length: usize) -> Result<(), TdiskError> {
    if offset + length as u64 > size {
        return Err(TdiskError::out_of_range(format!(
            "{} bytes at offset {offset} exceed store size {size}",
            length
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_worker_reads_zeros_and_discards_writes() {
        let worker = NullWorker::new("blackhole", 1024);

        worker.write(0, vec![1, 2, 3]).await.unwrap();
        assert_eq!(worker.read(0, 3).await.unwrap(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn out_of_range_access_is_rejected() {
        let worker = MemWorker::new("mem", 16);

        let error = worker.read(10, 10).await.unwrap_err();
        assert_eq!(error.kind, tdisk_contracts::TdiskErrorKind::OutOfRange);

        let error = worker.write(16, vec![1]).await.unwrap_err();
        assert_eq!(error.kind, tdisk_contracts::TdiskErrorKind::OutOfRange);
    }

    #[tokio::test]
    async fn mem_worker_roundtrips() {
        let worker = MemWorker::new("mem", 64);

        worker.write(8, vec![4, 5, 6]).await.unwrap();
        assert_eq!(worker.read(8, 3).await.unwrap(), vec![4, 5, 6]);
        assert_eq!(worker.write_calls(), 1);
    }
}
