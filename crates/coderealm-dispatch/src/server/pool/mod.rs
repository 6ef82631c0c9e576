//! Admission of merged requests into concurrent pipeline workers.

pub mod manager;
pub mod worker;

use crate::{ingest::InboundRequest, pipeline::Pipeline};
use coderealm_core::Result;
use core::time::Duration;
use manager::WorkerPool;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

/// How many pipelines may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdmissionPolicy {
    /// One task per request with no ceiling.
    #[default]
    Unbounded,
    /// A fixed set of `workers`, each with a queue of `queue_size` requests.
    /// The dispatch loop waits while every queue is full.
    Bounded { workers: usize, queue_size: usize },
}

enum Admission {
    Unbounded {
        pipeline: Pipeline,
        tracker: TaskTracker,
    },
    Bounded(WorkerPool),
}

/// Hands requests to pipeline workers according to an [`AdmissionPolicy`].
///
/// [`admit`](Self::admit) returns as soon as the request is accepted; the
/// pipeline outcome is never reported back to the dispatch loop.
pub struct Dispatcher {
    inner: Admission,
}

impl Dispatcher {
    pub fn new(policy: AdmissionPolicy, pipeline: Pipeline) -> Self {
        let inner = match policy {
            AdmissionPolicy::Unbounded => Admission::Unbounded {
                pipeline,
                tracker: TaskTracker::new(),
            },
            AdmissionPolicy::Bounded {
                workers,
                queue_size,
            } => Admission::Bounded(WorkerPool::spawn(workers, queue_size, pipeline)),
        };
        Self { inner }
    }

    pub async fn admit(&self, request: InboundRequest) -> Result<()> {
        match &self.inner {
            Admission::Unbounded { pipeline, tracker } => {
                let pipeline = pipeline.clone();
                tracker.spawn(async move {
                    let _ = pipeline.handle(request).await;
                });
                Ok(())
            }
            Admission::Bounded(pool) => pool.send_to_next_worker(request).await,
        }
    }

    /// Drains `rx` until every sender is gone, admitting each request in
    /// arrival order. Returns the number of requests admitted.
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundRequest>) -> u64 {
        let mut admitted = 0_u64;
        while let Some(request) = rx.recv().await {
            let pid = request.request.pid.clone();
            if let Err(e) = self.admit(request).await {
                tracing::error!(pid = %pid, error_kind = e.kind(), "Failed to admit request: {e}");
                break;
            }
            admitted += 1;
        }
        tracing::debug!(admitted, "Dispatch loop finished");
        admitted
    }

    /// Stops admitting. A pending [`admit`](Self::admit) blocked on a full
    /// bounded pool returns [`Error::ServiceShutdown`](coderealm_core::Error::ServiceShutdown)
    /// and ends [`run`](Self::run).
    pub fn close(&self) {
        match &self.inner {
            Admission::Unbounded { tracker, .. } => {
                tracker.close();
            }
            Admission::Bounded(pool) => pool.close(),
        }
    }

    /// Waits up to `grace` for admitted requests to finish.
    pub async fn shutdown(&self, grace: Duration) {
        match &self.inner {
            Admission::Unbounded { tracker, .. } => {
                tracker.close();
                if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
                    tracing::warn!(
                        "Shutdown timed out with {} pipelines still running",
                        tracker.len()
                    );
                }
            }
            Admission::Bounded(pool) => {
                let _ = pool.shutdown(grace).await;
            }
        }
    }
}
