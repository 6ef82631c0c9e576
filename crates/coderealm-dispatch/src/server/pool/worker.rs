use crate::{ingest::InboundRequest, pipeline::Pipeline};
use tokio::sync::{mpsc, oneshot};

/// A message for a pool worker.
#[derive(Debug)]
pub enum WorkRequest {
    /// Run one request through the pipeline.
    Process { request: InboundRequest },
    /// Stop after acknowledging on `response`. Queued work sent earlier is
    /// processed first.
    Shutdown { response: oneshot::Sender<()> },
}

/// Worker task owned by a [`WorkerPool`](super::manager::WorkerPool).
///
/// Processes one request at a time until it receives
/// [`WorkRequest::Shutdown`] or its channel closes. Pipeline failures are
/// logged by the pipeline and do not stop the worker.
pub async fn worker_loop(worker_id: usize, mut rx: mpsc::Receiver<WorkRequest>, pipeline: Pipeline) {
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Process { request } => {
                let _ = pipeline.handle(request).await;
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    tracing::trace!("Worker {worker_id} stopped");
}
