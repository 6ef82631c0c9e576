//! Fixed-size worker pool for bounded dispatch.
//!
//! This module defines the [`WorkerPool`] struct, which runs a set of
//! asynchronous workers, each draining its own bounded [`mpsc::Receiver`] of
//! [`WorkRequest`]s. Work goes to the first worker with queue space, starting
//! from a round-robin cursor; when every queue is full the sender waits on
//! the worker under the cursor, which back-pressures the dispatch loop.

use super::worker::{WorkRequest, worker_loop};
use crate::{ingest::InboundRequest, pipeline::Pipeline};
use coderealm_core::Error;
use core::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Spawns `workers` workers (at least one), each with a queue of
    /// `queue_size` requests.
    pub fn spawn(workers: usize, queue_size: usize, pipeline: Pipeline) -> Self {
        let tracker = TaskTracker::new();
        let senders = (0..workers.max(1))
            .map(|worker_id| {
                let (tx, rx) = mpsc::channel(queue_size.max(1));
                tracker.spawn(worker_loop(worker_id, rx, pipeline.clone()));
                tx
            })
            .collect();
        tracker.close();

        Self {
            workers: senders,
            next_worker: AtomicUsize::new(0),
            shutdown_token: CancellationToken::new(),
            tracker,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Returns the index of the next worker to receive work (round-robin).
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Hands a request to a worker, waiting for queue space if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once [`shutdown`](Self::shutdown)
    /// has started, or [`Error::ChannelError`] if the chosen worker is gone.
    pub async fn send_to_next_worker(&self, request: InboundRequest) -> Result<(), Error> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let start = self.next_worker_index();
        let mut work = WorkRequest::Process { request };

        for offset in 0..self.workers.len() {
            let worker_idx = (start + offset) % self.workers.len();
            match self.workers[worker_idx].try_send(work) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(returned)) => work = returned,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(Error::ChannelError {
                        context: format!("Worker {worker_idx} channel closed"),
                    });
                }
            }
        }

        // Every queue is full: wait for space unless the pool is closed.
        tokio::select! {
            biased;
            () = self.shutdown_token.cancelled() => Err(Error::ServiceShutdown),
            sent = self.workers[start].send(work) => sent.map_err(|_| Error::ChannelError {
                context: format!("Worker {start} channel closed"),
            }),
        }
    }

    /// Refuses further requests and releases any sender waiting for queue
    /// space. Work already queued is kept.
    pub fn close(&self) {
        self.shutdown_token.cancel();
    }

    /// Drains and stops every worker.
    ///
    /// - Refuses further requests.
    /// - Queues a [`WorkRequest::Shutdown`] behind each worker's pending work.
    /// - Waits for every worker to acknowledge.
    ///
    /// All of it is bounded by `grace`, including waiting for queue space.
    /// Workers that miss the deadline are left to finish on their own.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), Error> {
        tracing::debug!("Refusing new work");
        self.close();

        let drained = timeout(grace, async {
            tracing::debug!("Notifying all workers to shut down");
            let mut acks = Vec::with_capacity(self.workers.len());
            for (i, worker) in self.workers.iter().enumerate() {
                let (tx, rx) = oneshot::channel();
                if let Err(e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                    tracing::error!("Failed to send shutdown to worker {i}: {e}");
                } else {
                    acks.push((i, rx));
                }
            }

            let waits = acks.into_iter().map(|(i, rx)| async move {
                match rx.await {
                    Ok(()) => tracing::trace!("Worker {i} shutdown acknowledged"),
                    Err(e) => tracing::error!("Worker {i} dropped its acknowledgement: {e}"),
                }
            });
            futures::future::join_all(waits).await;
            self.tracker.wait().await;
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                "Worker pool shutdown timed out ({} workers still running)",
                self.tracker.len()
            );
            return Err(Error::ServiceShutdown);
        }

        tracing::debug!("Worker pool shutdown complete");
        Ok(())
    }
}
