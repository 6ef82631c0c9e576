use async_trait::async_trait;
use coderealm_core::Result;
use tokio::sync::mpsc;

/// A stream of raw request payloads.
#[async_trait]
pub trait MessageSource: Send {
    /// Stream name, used in logs and as the tag on forwarded requests.
    fn name(&self) -> &str;

    /// Waits for the next payload.
    ///
    /// `Ok(None)` means the source is exhausted and will never yield again.
    /// An `Err` is transient: the caller may call again after backing off.
    async fn next_message(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Channel-backed source for tests and local runs.
#[derive(Debug)]
pub struct MemorySource {
    name: String,
    rx: mpsc::Receiver<Vec<u8>>,
}

/// Creates a [`MemorySource`] and the sender that feeds it.
///
/// The source is exhausted once every sender is dropped and the buffered
/// payloads are consumed.
pub fn memory_stream(name: &str, capacity: usize) -> (mpsc::Sender<Vec<u8>>, MemorySource) {
    let (tx, rx) = mpsc::channel(capacity);
    let source = MemorySource {
        name: name.to_string(),
        rx,
    };
    (tx, source)
}

#[async_trait]
impl MessageSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_message(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}
