//! Per-request pipeline.
//!
//! A request moves through up to four strictly sequential steps:
//!
//! 1. template resolution (submit only)
//! 2. code generation (submit only)
//! 3. execution over RPC
//! 4. result routing ([`routing`])
//!
//! Any step can abort the request. Nothing is retried; the error is logged,
//! counted by kind, and returned to the caller, which drops it.

pub mod routing;

use crate::codegen::CodeGenerator;
use crate::engine::ExecutionEngine;
use crate::ingest::InboundRequest;
use crate::server::telemetry::{
    decrement_workers_inflight, increment_pipeline_aborts, increment_workers_inflight,
    record_pipeline_duration,
};
use crate::store::{ProblemStore, ResultCache, SubmissionStore};
use coderealm_core::{
    Error, Result,
    types::{ExecutionRequest, RequestKind},
};
use routing::{Routed, route_run, route_submit};
use std::sync::Arc;
use std::time::Instant;

/// Handles to every collaborator the pipeline talks to.
///
/// Cloning is cheap and every clone shares the same handles, so one pipeline
/// can be handed to any number of concurrent workers.
#[derive(Clone)]
pub struct Pipeline {
    engine: Arc<dyn ExecutionEngine>,
    problems: Arc<dyn ProblemStore>,
    submissions: Arc<dyn SubmissionStore>,
    cache: Arc<dyn ResultCache>,
    generator: Arc<dyn CodeGenerator>,
}

impl Pipeline {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        problems: Arc<dyn ProblemStore>,
        submissions: Arc<dyn SubmissionStore>,
        cache: Arc<dyn ResultCache>,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            engine,
            problems,
            submissions,
            cache,
            generator,
        }
    }

    /// Runs one request to completion and reports the outcome.
    ///
    /// Every failure is logged here, so callers may ignore the returned
    /// error.
    #[tracing::instrument(
        skip_all,
        fields(
            pid = %inbound.request.pid,
            kind = inbound.request.kind.as_str(),
            stream = %inbound.stream,
        )
    )]
    pub async fn handle(&self, inbound: InboundRequest) -> Result<Routed> {
        let start = Instant::now();
        increment_workers_inflight();

        let result = self.process(inbound.request).await;

        decrement_workers_inflight();
        record_pipeline_duration(start.elapsed().as_millis() as f64);

        match &result {
            Ok(Routed::Cached) => tracing::debug!("Stored run output in cache"),
            Ok(Routed::Graded { counter }) => {
                tracing::debug!(counter = counter.field(), "Stored graded submission");
            }
            Err(e @ Error::Aggregate(_)) => {
                increment_pipeline_aborts(e.kind());
                tracing::error!(
                    error_kind = e.kind(),
                    "Submission persisted without aggregate update: {e}"
                );
            }
            Err(e @ Error::CacheWrite { .. }) => {
                increment_pipeline_aborts(e.kind());
                tracing::warn!(error_kind = e.kind(), "Run output not cached: {e}");
            }
            Err(e) => {
                increment_pipeline_aborts(e.kind());
                tracing::warn!(error_kind = e.kind(), "Request dropped: {e}");
            }
        }

        result
    }

    async fn process(&self, req: ExecutionRequest) -> Result<Routed> {
        match &req.kind {
            RequestKind::Run => {
                let output = self.engine.execute(&req.language, &req.code).await?;
                route_run(self.cache.as_ref(), &req.pid, &output).await
            }
            RequestKind::Submit { problem_id } => {
                let template = self.problems.template(problem_id, &req.language).await?;
                let code = self
                    .generator
                    .generate(&req.language, &req.code, &template)?;
                let output = self.engine.execute(&req.language, &code).await?;
                route_submit(
                    self.submissions.as_ref(),
                    self.problems.as_ref(),
                    &req,
                    problem_id,
                    code,
                    output,
                )
                .await
            }
        }
    }
}
