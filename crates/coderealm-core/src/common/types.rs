//! # Shared Request and Result Types
//!
//! This module defines the values that flow through the dispatch pipeline,
//! from the decoded inbound message to the durable submission record.
//!
//! ## Overview
//!
//! - [`ExecutionRequest`] - A decoded, validated request. The wire form uses
//!   camelCase fields (`reqType`, `queId`) and is handled by [`WireRequest`].
//! - [`RequestKind`] - Run (ungraded, cached) or submit (graded, persisted).
//!   A submit request always carries its problem id.
//! - [`ProblemTemplate`] - The per-language scaffold the requester code is
//!   combined with before execution.
//! - [`ResultEnvelope`] - The typed view of a graded engine output.
//! - [`Submission`] - The durable record of one graded attempt.
//! - [`Counter`] - Which of a problem's two aggregate counters to increment.

use crate::common::error::{Error, Result};
use chrono::{DateTime, Utc};
use core::time::Duration;
use serde::{Deserialize, Serialize};

/// How long a run-type output stays retrievable in the result cache.
pub const RESULT_TTL: Duration = Duration::from_secs(3 * 60);

/// Value stored in the runtime and memory columns until the engine reports
/// real measurements.
pub const METRIC_PLACEHOLDER: &str = "0";

/// Whether a request is graded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Ad hoc execution; output is cached under the PID.
    Run,
    /// Graded execution against a stored problem.
    Submit { problem_id: String },
}

impl RequestKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Run => "run",
            RequestKind::Submit { .. } => "submit",
        }
    }
}

/// A decoded execution request. Consumed exactly once by a pipeline worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    /// Client-chosen correlation token; the cache key for run outputs.
    pub pid: String,
    pub kind: RequestKind,
    pub email: String,
}

impl ExecutionRequest {
    /// Decodes and validates a JSON payload from an inbound stream.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the payload is not valid JSON, is missing
    /// required fields, names an unknown `reqType`, has an empty `pid`, or is
    /// a submit request without a `queId`.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let wire: WireRequest = serde_json::from_slice(payload).map_err(|e| Error::Decode {
            reason: e.to_string(),
        })?;
        Self::try_from(wire)
    }

    /// Encodes the request in its wire form.
    pub fn encode(&self) -> Vec<u8> {
        // A struct of plain strings always serializes.
        serde_json::to_vec(&WireRequest::from(self)).unwrap_or_default()
    }

    pub fn problem_id(&self) -> Option<&str> {
        match &self.kind {
            RequestKind::Run => None,
            RequestKind::Submit { problem_id } => Some(problem_id),
        }
    }
}

/// Wire representation of an [`ExecutionRequest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireRequest {
    pub language: String,
    pub code: String,
    pub pid: String,
    #[serde(rename = "reqType")]
    pub req_type: String,
    #[serde(rename = "queId", default, skip_serializing_if = "Option::is_none")]
    pub que_id: Option<String>,
    #[serde(default)]
    pub email: String,
}

impl TryFrom<WireRequest> for ExecutionRequest {
    type Error = Error;

    fn try_from(wire: WireRequest) -> Result<Self> {
        if wire.pid.is_empty() {
            return Err(Error::Decode {
                reason: "pid must not be empty".to_string(),
            });
        }

        let kind = match wire.req_type.as_str() {
            "run" => RequestKind::Run,
            "submit" => match wire.que_id {
                Some(problem_id) if !problem_id.is_empty() => RequestKind::Submit { problem_id },
                _ => {
                    return Err(Error::Decode {
                        reason: "submit request without queId".to_string(),
                    });
                }
            },
            other => {
                return Err(Error::Decode {
                    reason: format!("unknown reqType {other:?}"),
                });
            }
        };

        Ok(Self {
            language: wire.language,
            code: wire.code,
            pid: wire.pid,
            kind,
            email: wire.email,
        })
    }
}

impl From<&ExecutionRequest> for WireRequest {
    fn from(req: &ExecutionRequest) -> Self {
        Self {
            language: req.language.clone(),
            code: req.code.clone(),
            pid: req.pid.clone(),
            req_type: req.kind.as_str().to_string(),
            que_id: req.problem_id().map(str::to_string),
            email: req.email.clone(),
        }
    }
}

/// Per-language code scaffold of a stored problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemTemplate {
    pub problem_id: String,
    pub language: String,
    pub scaffold: String,
}

/// Typed view of a graded engine output.
///
/// Only `status` is required; any other fields the engine emits are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ResultEnvelope {
    pub status: bool,
}

impl ResultEnvelope {
    /// Parses the raw engine output of a graded execution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Routing`] when the output is not a JSON object with a
    /// boolean `status` field.
    pub fn parse(output: &str) -> Result<Self> {
        serde_json::from_str(output).map_err(|e| Error::Routing {
            reason: format!("invalid result envelope: {e}"),
        })
    }

    pub const fn counter(&self) -> Counter {
        if self.status {
            Counter::Correct
        } else {
            Counter::Wrong
        }
    }
}

/// One of a problem's two aggregate counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Correct,
    Wrong,
}

impl Counter {
    /// Name of the backing field.
    pub const fn field(&self) -> &'static str {
        match self {
            Counter::Correct => "correct",
            Counter::Wrong => "wrong",
        }
    }
}

/// Current value of a problem's aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProblemAggregate {
    pub correct: u64,
    pub wrong: u64,
}

/// Durable record of one graded execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub pid: String,
    pub problem_id: String,
    pub email: String,
    pub language: String,
    pub code: String,
    pub output: String,
    pub submitted_at: DateTime<Utc>,
    pub runtime: String,
    pub memory: String,
}

impl Submission {
    /// Builds the record for a graded request. `code` is the generated code
    /// that was actually executed.
    pub fn new(req: &ExecutionRequest, problem_id: &str, code: String, output: String) -> Self {
        Self {
            pid: req.pid.clone(),
            problem_id: problem_id.to_string(),
            email: req.email.clone(),
            language: req.language.clone(),
            code,
            output,
            submitted_at: Utc::now(),
            runtime: METRIC_PLACEHOLDER.to_string(),
            memory: METRIC_PLACEHOLDER.to_string(),
        }
    }
}
