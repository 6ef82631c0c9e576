//! Top-level dispatch service.
//!
//! [`DispatchService`] owns the per-request [`Pipeline`] and the admission
//! policy. [`DispatchService::serve`] runs one full lifecycle:
//!
//! 1. start one ingestor per source behind a [`FanIn`]
//! 2. drain the merged channel into the [`Dispatcher`]
//! 3. once every ingestor has stopped and the channel is empty, wait for
//!    admitted requests to finish
//!
//! Cancelling the shared token stops the ingestors; requests already in the
//! merged channel are still dispatched. If dispatching them is still blocked
//! on a full pool after the shutdown timeout, the rest are dropped and the
//! workers get no further grace.

use crate::{
    ingest::{FanIn, IngestStats, MessageSource},
    pipeline::Pipeline,
    server::{
        config::DispatchConfig,
        pool::{AdmissionPolicy, Dispatcher},
    },
};
use core::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a finished [`DispatchService::serve`] call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Requests handed to a worker.
    pub admitted: u64,
    /// Ingestion counters per stream, in source order.
    pub streams: Vec<(String, IngestStats)>,
}

#[derive(Clone)]
pub struct DispatchService {
    pipeline: Pipeline,
    admission: AdmissionPolicy,
    handoff_buffer_size: usize,
    shutdown_timeout: Duration,
    shutdown_token: CancellationToken,
}

impl DispatchService {
    pub fn new(
        pipeline: Pipeline,
        admission: AdmissionPolicy,
        handoff_buffer_size: usize,
        shutdown_timeout: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            admission,
            handoff_buffer_size,
            shutdown_timeout,
            shutdown_token,
        }
    }

    pub fn from_config(
        config: &DispatchConfig,
        pipeline: Pipeline,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self::new(
            pipeline,
            config.admission,
            config.handoff_buffer_size,
            config.shutdown_timeout,
            shutdown_token,
        )
    }

    /// Stops ingestion. [`serve`](Self::serve) returns once in-flight work
    /// has drained or the shutdown timeout has elapsed.
    pub fn shutdown(&self) {
        tracing::info!("Refusing new requests");
        self.shutdown_token.cancel();
    }

    /// Runs until every source is exhausted or [`shutdown`](Self::shutdown)
    /// is called.
    pub async fn serve(&self, sources: Vec<Box<dyn MessageSource>>) -> DispatchReport {
        let mut fan_in = FanIn::new(self.handoff_buffer_size, self.shutdown_token.clone());
        for source in sources {
            tracing::info!(stream = source.name(), "Subscribed to stream");
            fan_in.add_source(source);
        }

        let (rx, ingestors) = fan_in.start();
        let dispatcher = Dispatcher::new(self.admission, self.pipeline.clone());

        let run = dispatcher.run(rx);
        tokio::pin!(run);
        let (admitted, grace) = tokio::select! {
            admitted = &mut run => (admitted, self.shutdown_timeout),
            () = self.drain_deadline() => {
                tracing::warn!(
                    "Dispatch loop still blocked {:?} after shutdown, dropping queued requests",
                    self.shutdown_timeout
                );
                dispatcher.close();
                (run.await, Duration::ZERO)
            }
        };

        tracing::info!("Draining in-flight requests (up to {:?})", grace);
        dispatcher.shutdown(grace).await;

        let streams = ingestors.join().await;
        tracing::info!(admitted, "Dispatch service stopped");

        DispatchReport { admitted, streams }
    }

    /// Resolves `shutdown_timeout` after shutdown was requested.
    async fn drain_deadline(&self) {
        self.shutdown_token.cancelled().await;
        tokio::time::sleep(self.shutdown_timeout).await;
    }
}
