use super::{InboundRequest, MessageSource};
use crate::server::telemetry::{increment_decode_errors, increment_requests_received};
use coderealm_core::types::ExecutionRequest;
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pause after a failed read before asking the source again.
pub const READ_BACKOFF: Duration = Duration::from_millis(500);

/// Counters reported by an [`Ingestor`] when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Payloads read from the source.
    pub received: u64,
    /// Payloads decoded and handed to the shared channel.
    pub forwarded: u64,
    /// Payloads dropped because they failed to decode.
    pub rejected: u64,
}

/// Drains one [`MessageSource`] into the shared channel.
///
/// Stops when the source is exhausted, the channel is closed, or the token
/// is cancelled. A payload that fails to decode is logged and skipped.
pub struct Ingestor {
    source: Box<dyn MessageSource>,
    stream: Arc<str>,
    tx: mpsc::Sender<InboundRequest>,
    token: CancellationToken,
}

impl Ingestor {
    pub fn new(
        source: Box<dyn MessageSource>,
        tx: mpsc::Sender<InboundRequest>,
        token: CancellationToken,
    ) -> Self {
        let stream = Arc::from(source.name());
        Self {
            source,
            stream,
            tx,
            token,
        }
    }

    #[tracing::instrument(skip_all, fields(stream = %self.stream))]
    pub async fn run(mut self) -> IngestStats {
        let mut stats = IngestStats::default();
        tracing::debug!("Ingestor started");

        loop {
            let next = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                next = self.source.next_message() => next,
            };

            let payload = match next {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    tracing::debug!("Source exhausted");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error_kind = e.kind(), "Read failed: {e}");
                    tokio::select! {
                        () = self.token.cancelled() => break,
                        () = tokio::time::sleep(READ_BACKOFF) => continue,
                    }
                }
            };

            stats.received += 1;
            increment_requests_received(&self.stream);

            let request = match ExecutionRequest::decode(&payload) {
                Ok(request) => request,
                Err(e) => {
                    stats.rejected += 1;
                    increment_decode_errors(&self.stream);
                    tracing::warn!(error_kind = e.kind(), "Dropping malformed payload: {e}");
                    continue;
                }
            };

            tracing::trace!(pid = %request.pid, kind = request.kind.as_str(), "Forwarding request");
            let inbound = InboundRequest {
                stream: self.stream.clone(),
                request,
            };

            let sent = tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                sent = self.tx.send(inbound) => sent,
            };
            if sent.is_err() {
                tracing::debug!("Shared channel closed");
                break;
            }
            stats.forwarded += 1;
        }

        tracing::info!(
            received = stats.received,
            forwarded = stats.forwarded,
            rejected = stats.rejected,
            "Ingestor stopped"
        );
        stats
    }
}
