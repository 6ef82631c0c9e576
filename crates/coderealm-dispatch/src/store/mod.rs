//! Storage seams used by the pipeline.
//!
//! Each trait covers exactly the operations the dispatcher needs and nothing
//! more: the cache is write-only, the submission log is append-only, and the
//! problem store exposes a template read and an atomic counter increment.
//! Handles are passed into the pipeline explicitly as `Arc<dyn _>`.
//!
//! ## Adapters
//!
//! - [`redis::RedisCache`] - `SET key value EX ttl`
//! - [`postgres::PgProblemStore`] / [`postgres::PgSubmissionStore`] - sqlx
//! - [`memory`] - in-process adapters for tests and local runs

pub mod memory;
pub mod postgres;
pub mod redis;

use async_trait::async_trait;
use coderealm_core::{
    AggregateError, Result,
    types::{Counter, ProblemTemplate, Submission},
};
use core::time::Duration;

/// Key/value store with per-entry expiry.
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Stores `value` under `key`, replacing any previous entry and its
    /// expiry.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Read access to problem templates plus the per-problem counters.
#[async_trait]
pub trait ProblemStore: Send + Sync {
    /// Looks up the scaffold for `language` on `problem_id`.
    ///
    /// Returns [`coderealm_core::Error::Lookup`] if the problem does not exist,
    /// has no template for the language, or the store cannot be reached.
    async fn template(&self, problem_id: &str, language: &str) -> Result<ProblemTemplate>;

    /// Atomically adds one to `counter` on `problem_id`.
    ///
    /// Must not read-modify-write from the client side; concurrent calls on
    /// the same problem must all be counted.
    async fn increment(
        &self,
        problem_id: &str,
        counter: Counter,
    ) -> core::result::Result<(), AggregateError>;
}

/// Append-only log of graded submissions.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert(&self, submission: &Submission) -> Result<()>;
}
