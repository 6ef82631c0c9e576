//! In-process store adapters.
//!
//! Every adapter can be switched into an "unavailable" state so callers can
//! observe how the pipeline behaves when a backend is down.

use super::{ProblemStore, ResultCache, SubmissionStore};
use async_trait::async_trait;
use coderealm_core::{
    AggregateError, Error, Result,
    types::{Counter, ProblemAggregate, ProblemTemplate, Submission},
};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Expiring key/value map.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live value under `key`, if it has not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Remaining time to live of `key`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock();
        entries
            .get(key)
            .and_then(|entry| entry.expires_at.checked_duration_since(Instant::now()))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful writes, including overwrites.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::CacheWrite {
                reason: "cache unavailable".to_string(),
            });
        }

        self.entries.lock().insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Problem {
    templates: HashMap<String, String>,
    aggregate: ProblemAggregate,
}

/// Problems keyed by id, each with per-language templates and counters.
#[derive(Debug, Default)]
pub struct MemoryProblemStore {
    problems: Mutex<HashMap<String, Problem>>,
    unavailable: AtomicBool,
}

impl MemoryProblemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a problem with the given `(language, scaffold)`
    /// templates and zeroed counters.
    pub fn insert_problem<'a>(
        &self,
        problem_id: &str,
        templates: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) {
        let templates = templates
            .into_iter()
            .map(|(language, scaffold)| (language.to_string(), scaffold.to_string()))
            .collect();
        self.problems.lock().insert(
            problem_id.to_string(),
            Problem {
                templates,
                aggregate: ProblemAggregate::default(),
            },
        );
    }

    pub fn remove_problem(&self, problem_id: &str) {
        self.problems.lock().remove(problem_id);
    }

    pub fn aggregate(&self, problem_id: &str) -> Option<ProblemAggregate> {
        self.problems.lock().get(problem_id).map(|p| p.aggregate)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl ProblemStore for MemoryProblemStore {
    async fn template(&self, problem_id: &str, language: &str) -> Result<ProblemTemplate> {
        let lookup_error = |reason: &str| Error::Lookup {
            problem_id: problem_id.to_string(),
            language: language.to_string(),
            reason: reason.to_string(),
        };

        if self.unavailable.load(Ordering::Relaxed) {
            return Err(lookup_error("problem store unavailable"));
        }

        let problems = self.problems.lock();
        let problem = problems
            .get(problem_id)
            .ok_or_else(|| lookup_error("problem not found"))?;
        let scaffold = problem
            .templates
            .get(language)
            .ok_or_else(|| lookup_error("no template for language"))?;

        Ok(ProblemTemplate {
            problem_id: problem_id.to_string(),
            language: language.to_string(),
            scaffold: scaffold.clone(),
        })
    }

    async fn increment(
        &self,
        problem_id: &str,
        counter: Counter,
    ) -> core::result::Result<(), AggregateError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(AggregateError::Store {
                problem_id: problem_id.to_string(),
                field: counter.field(),
                reason: "problem store unavailable".to_string(),
            });
        }

        let mut problems = self.problems.lock();
        let problem = problems
            .get_mut(problem_id)
            .ok_or_else(|| AggregateError::NotMatched {
                problem_id: problem_id.to_string(),
                field: counter.field(),
            })?;

        match counter {
            Counter::Correct => problem.aggregate.correct += 1,
            Counter::Wrong => problem.aggregate.wrong += 1,
        }
        Ok(())
    }
}

/// Append-only vector of submissions.
#[derive(Debug, Default)]
pub struct MemorySubmissionStore {
    submissions: Mutex<Vec<Submission>>,
    unavailable: AtomicBool,
}

impl MemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.submissions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn insert(&self, submission: &Submission) -> Result<()> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::Persistence {
                reason: "submission store unavailable".to_string(),
            });
        }

        self.submissions.lock().push(submission.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_overwrites_and_expires() {
        let cache = MemoryCache::new();

        cache.set_with_ttl("k", "v1", Duration::from_secs(60)).await.unwrap();
        cache.set_with_ttl("k", "v2", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").as_deref(), Some("v2"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.writes(), 2);

        cache.set_with_ttl("gone", "v", Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("gone"), None);
    }

    #[tokio::test]
    async fn problem_lookup_distinguishes_missing_language() {
        let store = MemoryProblemStore::new();
        store.insert_problem("p1", [("python", "{{USER_CODE}}")]);

        let template = store.template("p1", "python").await.unwrap();
        assert_eq!(template.scaffold, "{{USER_CODE}}");

        let err = store.template("p1", "cpp").await.unwrap_err();
        assert!(err.to_string().contains("no template"));

        let err = store.template("p2", "python").await.unwrap_err();
        assert!(err.to_string().contains("problem not found"));
    }

    #[tokio::test]
    async fn increment_reports_not_matched_separately() {
        let store = MemoryProblemStore::new();
        store.insert_problem("p1", [("python", "{{USER_CODE}}")]);

        store.increment("p1", Counter::Correct).await.unwrap();
        store.increment("p1", Counter::Wrong).await.unwrap();
        store.increment("p1", Counter::Wrong).await.unwrap();
        assert_eq!(
            store.aggregate("p1"),
            Some(ProblemAggregate {
                correct: 1,
                wrong: 2
            })
        );

        assert_eq!(
            store.increment("missing", Counter::Correct).await,
            Err(AggregateError::NotMatched {
                problem_id: "missing".to_string(),
                field: "correct",
            })
        );

        store.set_unavailable(true);
        assert!(matches!(
            store.increment("p1", Counter::Correct).await,
            Err(AggregateError::Store { .. })
        ));
    }
}
