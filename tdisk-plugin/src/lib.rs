// SPDX-License-Identifier: GPL-3.0-only

//! Plugin backend protocol.
//!
//! A plugin-backed member device is served by a worker with an independent
//! failure domain (separate process or remote peer). The registry treats
//! it as an opaque block store with exactly three capabilities — size,
//! read, write — plus a liveness probe that never queues behind data I/O.
//!
//! High-latency backends make one-write-per-block prohibitively slow, so a
//! write-coalescing buffer sits in front of each worker and merges
//! contiguous or overlapping writes before they are shipped. Backends with
//! session-based uploads get chunked-upload machinery with expiring
//! tokens.

pub mod client;
pub mod coalesce;
pub mod supervisor;
pub mod upload;
pub mod workers;
pub mod write_buffer;

pub use client::{PluginClient, spawn_worker};
pub use coalesce::{CoalesceConfig, CoalescingWriter};
pub use supervisor::{Supervisor, SupervisorConfig, WorkerHealth};
pub use upload::{ChunkedUploader, UploadSession, UploadTransport};
pub use workers::{MemWorker, NullWorker};
pub use write_buffer::{PendingWrite, WriteBuffer, can_be_combined};
