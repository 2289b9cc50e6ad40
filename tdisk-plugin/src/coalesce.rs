// SPDX-License-Identifier: GPL-3.0-only

//! Coalescing front of a plugin worker.
//!
//! All writes destined for one plugin-backed device funnel through one
//! `CoalescingWriter`. Merge-or-append and drain handoff happen under a
//! per-queue mutex; the actual worker I/O is issued after the lock is
//! released, so drains block new appends only for the duration of the
//! handoff.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tdisk_contracts::{BlockWorker, TdiskError};

use crate::client::PluginClient;
use crate::write_buffer::{PendingWrite, WriteBuffer};

#[derive(Debug, Clone, Copy)]
pub struct CoalesceConfig {
    /// Maximum span of one coalesced write
    pub max_span_bytes: usize,

    /// Buffered-bytes threshold that forces a drain
    pub max_buffered_bytes: usize,

    /// Age after which a queue is drained by the background flush task
    pub flush_interval: Duration,

    /// Number of independent write queues, selected by offset stripe
    pub write_queues: usize,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            max_span_bytes: 1 << 20,
            max_buffered_bytes: 4 << 20,
            flush_interval: Duration::from_secs(5),
            write_queues: 1,
        }
    }
}

pub struct CoalescingWriter {
    client: PluginClient,
    queues: Vec<Mutex<WriteBuffer>>,
    config: CoalesceConfig,
}

impl CoalescingWriter {
    pub fn new(client: PluginClient, config: CoalesceConfig) -> Self {
        let queues = (0..config.write_queues.max(1))
            .map(|_| Mutex::new(WriteBuffer::new(config.max_span_bytes, config.max_buffered_bytes)))
            .collect();

        Self {
            client,
            queues,
            config,
        }
    }

    pub fn client(&self) -> &PluginClient {
        &self.client
    }

    fn queue_for(&self, offset: u64) -> &Mutex<WriteBuffer> {
        let stripe = (offset / self.config.max_span_bytes.max(1) as u64) as usize;
        &self.queues[stripe % self.queues.len()]
    }

    /// Buffers one write, draining the queue to the worker when it
    /// reached its maximum size.
    pub async fn write(&self, offset: u64, data: Vec<u8>) -> Result<(), TdiskError> {
        let drained = {
            let mut buffer = self.queue_for(offset).lock().expect("write queue poisoned");
            if buffer.append(offset, data) {
                buffer.get_and_pop()
            } else {
                Vec::new()
            }
        };

        self.issue(drained).await
    }

    /// Reads through the pending buffers first so a writer sees its own
    /// bytes before they reach the worker.
    pub async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, TdiskError> {
        let pending = {
            let buffer = self.queue_for(offset).lock().expect("write queue poisoned");
            buffer.read(offset, length)
        };

        match pending {
            Some(data) => Ok(data),
            None => self.client.read(offset, length).await,
        }
    }

    /// Drains every queue now
    pub async fn flush(&self) -> Result<(), TdiskError> {
        let mut drained = Vec::new();
        for queue in &self.queues {
            drained.extend(queue.lock().expect("write queue poisoned").get_and_pop());
        }

        self.issue(drained).await
    }

    /// Drains only the queues whose last touch is older than the
    /// configured flush interval
    pub async fn flush_aged(&self) -> Result<(), TdiskError> {
        let mut drained = Vec::new();
        for queue in &self.queues {
            let mut buffer = queue.lock().expect("write queue poisoned");
            if !buffer.is_empty() && buffer.age() >= self.config.flush_interval {
                drained.extend(buffer.get_and_pop());
            }
        }

        self.issue(drained).await
    }

    /// Time-based flush loop; one write call per drained buffer slot
    pub fn spawn_flush_task(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.config.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = self.flush_aged().await {
                            tracing::warn!(
                                plugin = self.client.name(),
                                %error,
                                "timed flush failed"
                            );
                        }
                    }
                }
            }
        });
    }

    async fn issue(&self, drained: Vec<PendingWrite>) -> Result<(), TdiskError> {
        for entry in drained {
            self.client.write(entry.offset, entry.data).await?;
        }
        Ok(())
    }
}
