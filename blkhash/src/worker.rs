//! Hasher worker pool (spec.md §4.4).
//!
//! Modeled directly on `original_source/test/blkhash_flat.py`'s
//! `HasherPool`/`Future` pair, generalized from one shared queue/root to
//! `thread_count` queues, each pinned to the subset of streams that route
//! to it (`worker = stream mod thread_count`). Because a `sync_channel` is
//! a strict FIFO with a single consumer, results come back to the routing
//! thread in the same order blocks were submitted to that worker, which is
//! exactly what per-stream ordering (I2) needs — no reordering buffer, no
//! per-result block-index bookkeeping, matching spec.md Design Notes §9.

use std::sync::mpsc::{Receiver, RecvError, SyncSender, TrySendError};
use std::thread::JoinHandle;

use bytes::Bytes;
use tracing::debug;

use crate::digest::Primitive;
use crate::error::{Error, Result};

/// A unit of hashing work submitted to one worker.
enum WorkItem {
    /// Hash `data` with the primitive and report the digest.
    Compute { block_index: u64, stream: usize, data: Bytes },
    /// `digest` is already known (the zero shortcut); pass it through the
    /// same ordered pipe without touching the primitive.
    Known { block_index: u64, stream: usize, digest: Vec<u8> },
    /// Drain and exit.
    Stop,
}

/// `(block_index, stream, digest)` — a completed unit of work.
pub type Completion = (u64, usize, Vec<u8>);

struct Worker {
    inbox: SyncSender<WorkItem>,
    outbox: Receiver<Completion>,
    handle: Option<JoinHandle<()>>,
}

/// A fixed set of `T` worker threads computing per-block digests in
/// parallel, each with a bounded inbound queue of depth `Q`.
pub struct Pool {
    workers: Vec<Worker>,
}

impl Pool {
    pub fn new(primitive: Primitive, thread_count: usize, queue_depth: usize) -> Self {
        assert!(thread_count > 0, "thread_count must be positive");
        let queue_depth = queue_depth.max(1);

        debug!(thread_count, queue_depth, "spawning hasher worker pool");

        let workers = (0..thread_count)
            .map(|id| {
                let (inbox, inbox_rx) = std::sync::mpsc::sync_channel::<WorkItem>(queue_depth);
                let (outbox_tx, outbox) = std::sync::mpsc::sync_channel::<Completion>(queue_depth);
                let handle = std::thread::Builder::new()
                    .name(format!("blkhash/{id}"))
                    .spawn(move || Self::run(primitive, inbox_rx, outbox_tx))
                    .expect("failed to spawn hasher worker thread");
                Worker {
                    inbox,
                    outbox,
                    handle: Some(handle),
                }
            })
            .collect();

        Self { workers }
    }

    fn run(primitive: Primitive, inbox: Receiver<WorkItem>, outbox: SyncSender<Completion>) {
        let mut scratch = primitive.new_scratch();
        while let Ok(item) = inbox.recv() {
            let completion = match item {
                WorkItem::Stop => break,
                WorkItem::Compute {
                    block_index,
                    stream,
                    data,
                } => {
                    scratch.update(&data);
                    (block_index, stream, scratch.finalize_reset())
                }
                WorkItem::Known {
                    block_index,
                    stream,
                    digest,
                } => (block_index, stream, digest),
            };
            if outbox.send(completion).is_err() {
                // Routing thread is gone; nothing left to do.
                break;
            }
        }
    }

    /// Submit a block for hashing. Blocks if the worker's inbound queue is
    /// full (backpressure, spec.md §5).
    pub fn submit_compute(
        &self,
        worker: usize,
        block_index: u64,
        stream: usize,
        data: Bytes,
    ) -> Result<()> {
        self.send(
            worker,
            WorkItem::Compute {
                block_index,
                stream,
                data,
            },
        )
    }

    /// Submit an already-known digest (the zero shortcut) through the same
    /// ordered pipe as computed blocks, so per-stream order is preserved
    /// without a separate fast path.
    pub fn submit_known(
        &self,
        worker: usize,
        block_index: u64,
        stream: usize,
        digest: Vec<u8>,
    ) -> Result<()> {
        self.send(
            worker,
            WorkItem::Known {
                block_index,
                stream,
                digest,
            },
        )
    }

    fn send(&self, worker: usize, item: WorkItem) -> Result<()> {
        self.workers[worker].inbox.send(item).map_err(|_| {
            Error::IOFailure(std::io::Error::other("hasher worker thread terminated"))
        })
    }

    /// Pop a completion if one is already available, without blocking.
    pub fn try_collect(&self, worker: usize) -> Option<Completion> {
        self.workers[worker].outbox.try_recv().ok()
    }

    /// Block until the named worker produces its next completion.
    pub fn collect(&self, worker: usize) -> Result<Completion> {
        self.workers[worker].outbox.recv().map_err(|RecvError| {
            Error::IOFailure(std::io::Error::other("hasher worker thread terminated"))
        })
    }

    /// Send a stop sentinel to every worker and join all threads
    /// (spec.md §4.4: "a sentinel work item signals the worker to drain
    /// its queue and exit").
    pub fn shutdown(mut self) {
        for w in &self.workers {
            // Best-effort: if the worker already died, there's nothing to
            // signal.
            let _ = match w.inbox.try_send(WorkItem::Stop) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => w.inbox.send(WorkItem::Stop),
                Err(TrySendError::Disconnected(_)) => Ok(()),
            };
        }
        for w in &mut self.workers {
            if let Some(handle) = w.handle.take() {
                let _ = handle.join();
            }
        }
        debug!("hasher worker pool shut down");
    }
}
