// SPDX-License-Identifier: GPL-3.0-only

//! Message-passing client for a plugin worker.
//!
//! The worker may be a genuinely separate process or a remote peer, so it
//! is represented as an actor: data requests travel over one channel with
//! oneshot replies, liveness probes over a second channel served by an
//! independent task. A probe therefore never waits behind an in-flight
//! read or write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tdisk_contracts::{BlockWorker, TdiskError};

enum DataRequest {
    Size {
        reply: oneshot::Sender<Result<u64, TdiskError>>,
    },
    Read {
        offset: u64,
        length: usize,
        reply: oneshot::Sender<Result<Vec<u8>, TdiskError>>,
    },
    Write {
        offset: u64,
        data: Vec<u8>,
        reply: oneshot::Sender<Result<(), TdiskError>>,
    },
}

type ProbeRequest = oneshot::Sender<bool>;

/// Handle to one plugin worker
#[derive(Clone)]
pub struct PluginClient {
    name: String,
    data_tx: mpsc::Sender<DataRequest>,
    probe_tx: mpsc::Sender<ProbeRequest>,
    cancel: CancellationToken,
}

/// Spawns the request and liveness loops for `worker` and returns the
/// client handle. Dropping the handle (or calling `stop`) shuts both
/// loops down.
pub fn spawn_worker(worker: Arc<dyn BlockWorker>) -> PluginClient {
    let (data_tx, mut data_rx) = mpsc::channel::<DataRequest>(32);
    let (probe_tx, mut probe_rx) = mpsc::channel::<ProbeRequest>(4);
    let cancel = CancellationToken::new();

    let name = worker.name().to_string();

    {
        let worker = Arc::clone(&worker);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    request = data_rx.recv() => {
                        let Some(request) = request else { break };
                        serve(&*worker, request).await;
                    }
                }
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    reply = probe_rx.recv() => {
                        let Some(reply) = reply else { break };
                        let _ = reply.send(worker.is_running().await);
                    }
                }
            }
        });
    }

    PluginClient {
        name,
        data_tx,
        probe_tx,
        cancel,
    }
}

async fn serve(worker: &dyn BlockWorker, request: DataRequest) {
    match request {
        DataRequest::Size { reply } => {
            let _ = reply.send(worker.size().await);
        }
        DataRequest::Read {
            offset,
            length,
            reply,
        } => {
            let _ = reply.send(worker.read(offset, length).await);
        }
        DataRequest::Write {
            offset,
            data,
            reply,
        } => {
            let _ = reply.send(worker.write(offset, data).await);
        }
    }
}

impl PluginClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get_size(&self) -> Result<u64, TdiskError> {
        let (reply, response) = oneshot::channel();
        self.request(DataRequest::Size { reply }, response).await
    }

    pub async fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>, TdiskError> {
        let (reply, response) = oneshot::channel();
        self.request(
            DataRequest::Read {
                offset,
                length,
                reply,
            },
            response,
        )
        .await
    }

    pub async fn write(&self, offset: u64, data: Vec<u8>) -> Result<(), TdiskError> {
        let (reply, response) = oneshot::channel();
        self.request(
            DataRequest::Write {
                offset,
                data,
                reply,
            },
            response,
        )
        .await
    }

    /// Short, separately-timed liveness probe. Returns false when the
    /// worker does not answer within `timeout`.
    pub async fn probe(&self, timeout: Duration) -> bool {
        let (reply, response) = oneshot::channel();
        if self.probe_tx.send(reply).await.is_err() {
            return false;
        }

        matches!(
            tokio::time::timeout(timeout, response).await,
            Ok(Ok(true))
        )
    }

    /// Stops the worker loops. In-flight requests get an `Unavailable`
    /// reply through their dropped channels.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn request<T>(
        &self,
        request: DataRequest,
        response: oneshot::Receiver<Result<T, TdiskError>>,
    ) -> Result<T, TdiskError> {
        self.data_tx.send(request).await.map_err(|_| {
            TdiskError::unavailable(format!("plugin worker {} is gone", self.name))
        })?;

        response.await.unwrap_or_else(|_| {
            Err(TdiskError::unavailable(format!(
                "plugin worker {} dropped the request",
                self.name
            )))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::{MemWorker, NullWorker};

    #[tokio::test]
    async fn size_read_write_roundtrip() {
        let client = spawn_worker(Arc::new(MemWorker::new("mem", 4096)));

        assert_eq!(client.get_size().await.unwrap(), 4096);

        client.write(100, vec![7, 8, 9]).await.unwrap();
        assert_eq!(client.read(100, 3).await.unwrap(), vec![7, 8, 9]);
    }

    #[tokio::test]
    async fn probe_answers_true_for_running_worker() {
        let client = spawn_worker(Arc::new(NullWorker::new("null", 1 << 20)));
        assert!(client.probe(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn stopped_worker_is_unavailable() {
        let client = spawn_worker(Arc::new(NullWorker::new("null", 1 << 20)));
        client.stop();

        // Allow the loops to observe cancellation.
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!client.probe(Duration::from_millis(50)).await);

        let error = client.get_size().await.unwrap_err();
        assert_eq!(error.kind, tdisk_contracts::TdiskErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn probe_does_not_wait_behind_data_requests() {
        let worker = Arc::new(MemWorker::new("mem", 1 << 20));
        worker.set_read_delay(Duration::from_millis(250));
        let client = spawn_worker(worker);

        let slow = {
            let client = client.clone();
            tokio::spawn(async move { client.read(0, 16).await })
        };

        // The probe answers while the read is still in flight.
        assert!(client.probe(Duration::from_millis(100)).await);
        slow.await.unwrap().unwrap();
    }
}
