//! Result routing: the last pipeline step.
//!
//! Run outputs go to the cache; graded outputs go to the submission log
//! followed by exactly one counter increment.

use crate::server::telemetry::{
    increment_aggregate_errors, increment_cache_writes, increment_submissions_persisted,
};
use crate::store::{ProblemStore, ResultCache, SubmissionStore};
use coderealm_core::{
    Error, Result,
    types::{Counter, ExecutionRequest, RESULT_TTL, ResultEnvelope, Submission},
};

/// Where a request's output ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Run output stored under the PID.
    Cached,
    /// Submission persisted and `counter` incremented.
    Graded { counter: Counter },
}

/// Stores a run output under `pid` for [`RESULT_TTL`], replacing any earlier
/// output for the same PID.
pub async fn route_run(cache: &dyn ResultCache, pid: &str, output: &str) -> Result<Routed> {
    cache.set_with_ttl(pid, output, RESULT_TTL).await?;
    increment_cache_writes();
    Ok(Routed::Cached)
}

/// Persists a graded output and bumps the matching counter.
///
/// Steps stop at the first failure: a malformed envelope skips the insert and
/// a failed insert skips the increment. A failed increment leaves the inserted
/// submission in place.
pub async fn route_submit(
    submissions: &dyn SubmissionStore,
    problems: &dyn ProblemStore,
    req: &ExecutionRequest,
    problem_id: &str,
    code: String,
    output: String,
) -> Result<Routed> {
    let envelope = ResultEnvelope::parse(&output)?;
    let counter = envelope.counter();

    let submission = Submission::new(req, problem_id, code, output);
    submissions.insert(&submission).await?;
    increment_submissions_persisted(counter.field());

    if let Err(e) = problems.increment(problem_id, counter).await {
        let err = Error::from(e);
        increment_aggregate_errors(err.kind());
        return Err(err);
    }

    Ok(Routed::Graded { counter })
}
