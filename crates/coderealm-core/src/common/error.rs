//! Error types for the dispatch pipeline.
//!
//! This module defines the central `Error` enum. Every variant is terminal for
//! the single request it concerns: nothing in the pipeline retries, and errors
//! only ever surface through logs and metrics.
//!
//! ## Error Cases
//! - `Decode`: An inbound message could not be decoded into a request.
//! - `Lookup`: The problem or its template for the requested language was not
//!   found (or the problem store failed).
//! - `Generation`: The requester code could not be combined with the template.
//! - `Execution`: The execution engine RPC failed.
//! - `Routing`: The engine output for a graded request is not a valid result
//!   envelope.
//! - `Persistence`: The submission insert failed.
//! - `Aggregate`: The per-problem counter increment failed or matched nothing.
//!   The submission inserted just before it is not rolled back.
//! - `CacheWrite`: The result cache rejected a write.
//! - `Source`: Reading from an inbound stream failed.
//! - `ChannelError`: An internal communication failure between tasks.
//! - `ServiceShutdown`: Work arrived while the service was shutting down.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the dispatch pipeline.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Malformed inbound payload.
    #[error("Decode error: {reason}")]
    Decode { reason: String },

    /// Problem or per-language template missing.
    #[error("Lookup error for problem {problem_id} ({language}): {reason}")]
    Lookup {
        problem_id: String,
        language: String,
        reason: String,
    },

    /// Code generation from the template failed.
    #[error("Generation error: {reason}")]
    Generation { reason: String },

    /// The execution RPC failed.
    #[error("Execution error: {reason}")]
    Execution { reason: String },

    /// The engine output is not a valid result envelope.
    #[error("Routing error: {reason}")]
    Routing { reason: String },

    /// Submission insert failed.
    #[error("Persistence error: {reason}")]
    Persistence { reason: String },

    /// Counter increment failed after the submission was persisted.
    #[error("Aggregate error: {0}")]
    Aggregate(#[from] AggregateError),

    /// Cache write failed.
    #[error("Cache write error: {reason}")]
    CacheWrite { reason: String },

    /// Reading from an inbound stream failed.
    #[error("Source error on {stream}: {reason}")]
    Source { stream: String, reason: String },

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

/// Failure modes of the aggregate counter increment.
///
/// The two variants are kept apart so that a "matched nothing" outcome (the
/// problem vanished between lookup and increment) is never confused with a
/// store that could not be reached.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum AggregateError {
    #[error("store failure incrementing {field} on {problem_id}: {reason}")]
    Store {
        problem_id: String,
        field: &'static str,
        reason: String,
    },

    #[error("no problem matched {problem_id} when incrementing {field}")]
    NotMatched {
        problem_id: String,
        field: &'static str,
    },
}

impl Error {
    /// Short, stable label for logs and metric attributes.
    pub const fn kind(&self) -> &'static str {
        match self {
            Error::Decode { .. } => "decode",
            Error::Lookup { .. } => "lookup",
            Error::Generation { .. } => "generation",
            Error::Execution { .. } => "execution",
            Error::Routing { .. } => "routing",
            Error::Persistence { .. } => "persistence",
            Error::Aggregate(AggregateError::Store { .. }) => "aggregate_store",
            Error::Aggregate(AggregateError::NotMatched { .. }) => "aggregate_not_matched",
            Error::CacheWrite { .. } => "cache_write",
            Error::Source { .. } => "source",
            Error::ChannelError { .. } => "channel",
            Error::ServiceShutdown => "shutdown",
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        Error::Execution {
            reason: format!("{:?}: {}", status.code(), status.message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_kinds_are_distinct() {
        let store = Error::from(AggregateError::Store {
            problem_id: "p1".to_string(),
            field: "correct",
            reason: "connection reset".to_string(),
        });
        let unmatched = Error::from(AggregateError::NotMatched {
            problem_id: "p1".to_string(),
            field: "wrong",
        });

        assert_eq!(store.kind(), "aggregate_store");
        assert_eq!(unmatched.kind(), "aggregate_not_matched");
    }

    #[test]
    fn status_maps_to_execution() {
        let err = Error::from(Status::unavailable("engine down"));
        assert_eq!(err.kind(), "execution");
        assert!(err.to_string().contains("engine down"));
    }
}
