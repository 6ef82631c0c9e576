//! Inbound request streams.
//!
//! Each [`MessageSource`] is drained by its own [`Ingestor`]. The [`FanIn`]
//! merges every ingestor into one bounded channel of decoded
//! [`InboundRequest`]s.

mod fan_in;
mod ingestor;
pub mod redis;
mod source;

pub use fan_in::{FanIn, FanInHandle};
pub use ingestor::{IngestStats, Ingestor};
pub use source::{MemorySource, MessageSource, memory_stream};

use coderealm_core::types::ExecutionRequest;
use std::sync::Arc;

/// A decoded request tagged with the stream it was read from.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub stream: Arc<str>,
    pub request: ExecutionRequest,
}
