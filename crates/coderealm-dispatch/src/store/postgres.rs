//! Postgres adapters for problems and submissions.
//!
//! Expected schema:
//!
//! ```sql
//! CREATE TABLE problems (
//!     problem_id TEXT PRIMARY KEY,
//!     templates  JSONB  NOT NULL DEFAULT '{}',  -- {"python": "...", "cpp": "..."}
//!     correct    BIGINT NOT NULL DEFAULT 0,
//!     wrong      BIGINT NOT NULL DEFAULT 0
//! );
//!
//! CREATE TABLE submissions (
//!     id           BIGSERIAL PRIMARY KEY,
//!     pid          TEXT NOT NULL,
//!     problem_id   TEXT NOT NULL REFERENCES problems (problem_id),
//!     email        TEXT NOT NULL,
//!     language     TEXT NOT NULL,
//!     code         TEXT NOT NULL,
//!     output       TEXT NOT NULL,
//!     submitted_at TIMESTAMPTZ NOT NULL,
//!     runtime      TEXT NOT NULL,
//!     memory       TEXT NOT NULL
//! );
//! ```

use super::{ProblemStore, SubmissionStore};
use async_trait::async_trait;
use coderealm_core::{
    AggregateError, Error, Result,
    types::{Counter, ProblemTemplate, Submission},
};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Create a connection pool from a database URL.
pub async fn create_pool(
    database_url: &str,
    max_connections: u32,
) -> core::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

#[derive(Debug, Clone)]
pub struct PgProblemStore {
    pool: PgPool,
}

impl PgProblemStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProblemStore for PgProblemStore {
    async fn template(&self, problem_id: &str, language: &str) -> Result<ProblemTemplate> {
        let lookup_error = |reason: String| Error::Lookup {
            problem_id: problem_id.to_string(),
            language: language.to_string(),
            reason,
        };

        // Outer `None`: no such problem. Inner `None`: no template for the
        // language.
        let row: Option<Option<String>> =
            sqlx::query_scalar("SELECT templates ->> $2 FROM problems WHERE problem_id = $1")
                .bind(problem_id)
                .bind(language)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| lookup_error(e.to_string()))?;

        match row {
            Some(Some(scaffold)) => Ok(ProblemTemplate {
                problem_id: problem_id.to_string(),
                language: language.to_string(),
                scaffold,
            }),
            Some(None) => Err(lookup_error("no template for language".to_string())),
            None => Err(lookup_error("problem not found".to_string())),
        }
    }

    async fn increment(
        &self,
        problem_id: &str,
        counter: Counter,
    ) -> core::result::Result<(), AggregateError> {
        let sql = match counter {
            Counter::Correct => "UPDATE problems SET correct = correct + 1 WHERE problem_id = $1",
            Counter::Wrong => "UPDATE problems SET wrong = wrong + 1 WHERE problem_id = $1",
        };

        let result = sqlx::query(sql)
            .bind(problem_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AggregateError::Store {
                problem_id: problem_id.to_string(),
                field: counter.field(),
                reason: e.to_string(),
            })?;

        if result.rows_affected() == 0 {
            return Err(AggregateError::NotMatched {
                problem_id: problem_id.to_string(),
                field: counter.field(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgSubmissionStore {
    pool: PgPool,
}

impl PgSubmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn insert(&self, submission: &Submission) -> Result<()> {
        sqlx::query(
            "INSERT INTO submissions \
             (pid, problem_id, email, language, code, output, submitted_at, runtime, memory) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(&submission.pid)
        .bind(&submission.problem_id)
        .bind(&submission.email)
        .bind(&submission.language)
        .bind(&submission.code)
        .bind(&submission.output)
        .bind(submission.submitted_at)
        .bind(&submission.runtime)
        .bind(&submission.memory)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Persistence {
            reason: e.to_string(),
        })?;

        Ok(())
    }
}
