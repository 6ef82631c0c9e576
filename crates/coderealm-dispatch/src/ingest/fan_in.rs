use super::{IngestStats, Ingestor, InboundRequest, MessageSource};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Merges any number of sources into one bounded channel.
///
/// Sources are independent: one ending or failing leaves the others running,
/// and there is no ordering between them. The merged channel closes once
/// every ingestor has stopped and the buffered requests are consumed.
pub struct FanIn {
    capacity: usize,
    token: CancellationToken,
    sources: Vec<Box<dyn MessageSource>>,
}

impl FanIn {
    pub fn new(capacity: usize, token: CancellationToken) -> Self {
        Self {
            capacity,
            token,
            sources: Vec::new(),
        }
    }

    pub fn add_source(&mut self, source: Box<dyn MessageSource>) -> &mut Self {
        self.sources.push(source);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Spawns one ingestor per source.
    pub fn start(self) -> (mpsc::Receiver<InboundRequest>, FanInHandle) {
        let (tx, rx) = mpsc::channel(self.capacity.max(1));

        let tasks = self
            .sources
            .into_iter()
            .map(|source| {
                let name = source.name().to_string();
                let ingestor = Ingestor::new(source, tx.clone(), self.token.clone());
                (name, tokio::spawn(ingestor.run()))
            })
            .collect();

        // Only the ingestors hold senders now.
        drop(tx);

        (rx, FanInHandle { tasks })
    }
}

/// Running ingestors started by [`FanIn::start`].
pub struct FanInHandle {
    tasks: Vec<(String, JoinHandle<IngestStats>)>,
}

impl FanInHandle {
    /// Waits for every ingestor to stop and returns their counters by stream.
    ///
    /// An ingestor that panicked is logged and reported with zeroed counters.
    pub async fn join(self) -> Vec<(String, IngestStats)> {
        let mut stats = Vec::with_capacity(self.tasks.len());
        for (name, task) in self.tasks {
            let result = task.await.unwrap_or_else(|e| {
                tracing::error!(stream = %name, "Ingestor task failed: {e}");
                IngestStats::default()
            });
            stats.push((name, result));
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::memory_stream;

    fn run_payload(pid: &str) -> Vec<u8> {
        format!(r#"{{"language":"python","code":"print(1)","pid":"{pid}","reqType":"run"}}"#)
            .into_bytes()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn merges_sources_until_all_end() {
        let (submit_feed, submit) = memory_stream("submit", 4);
        let (run_feed, run) = memory_stream("run", 4);

        let mut fan_in = FanIn::new(2, CancellationToken::new());
        fan_in.add_source(Box::new(submit)).add_source(Box::new(run));
        assert_eq!(fan_in.len(), 2);
        let (mut rx, handle) = fan_in.start();

        run_feed.send(run_payload("r1")).await.unwrap();
        drop(run_feed);

        // One source ending leaves the other flowing.
        let first = rx.recv().await.unwrap();
        assert_eq!(&*first.stream, "run");

        submit_feed.send(run_payload("s1")).await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(&*second.stream, "submit");
        drop(submit_feed);

        assert!(rx.recv().await.is_none());
        let stats = handle.join().await;
        assert_eq!(stats.len(), 2);
        assert!(stats.iter().all(|(_, s)| s.forwarded == 1));
    }

    #[tokio::test]
    async fn cancellation_closes_merged_channel() {
        let (_feed, source) = memory_stream("run", 1);
        let token = CancellationToken::new();
        let mut fan_in = FanIn::new(4, token.clone());
        fan_in.add_source(Box::new(source));
        let (mut rx, handle) = fan_in.start();

        token.cancel();

        assert!(rx.recv().await.is_none());
        assert_eq!(handle.join().await[0].0, "run");
    }
}
