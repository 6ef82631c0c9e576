use async_trait::async_trait;
use coderealm_core::{
    Error, Result,
    types::{ProblemAggregate, RESULT_TTL},
};
use coderealm_dispatch::{
    codegen::MarkerGenerator,
    engine::ExecutionEngine,
    ingest::{MessageSource, memory_stream},
    pipeline::Pipeline,
    server::{
        pool::AdmissionPolicy,
        service::handler::{DispatchReport, DispatchService},
    },
    store::memory::{MemoryCache, MemoryProblemStore, MemorySubmissionStore},
};
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Answers by inspecting the program text.
///
/// - `print(1)` prints `1\n`
/// - programs containing `PASS` or `FAIL` print a graded envelope
/// - programs containing `CRASH` fail the call
/// - anything else prints a stack trace
struct ScriptedEngine;

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    async fn execute(&self, _language: &str, code: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        if code.contains("CRASH") {
            return Err(Error::Execution {
                reason: "status: Unavailable".to_string(),
            });
        }
        let output = if code == "print(1)" {
            "1\n"
        } else if code.contains("PASS") {
            r#"{"status":true}"#
        } else if code.contains("FAIL") {
            r#"{"status":false}"#
        } else {
            "Traceback (most recent call last):\n  File \"main.py\""
        };
        Ok(output.to_string())
    }
}

struct Env {
    problems: Arc<MemoryProblemStore>,
    submissions: Arc<MemorySubmissionStore>,
    cache: Arc<MemoryCache>,
    service: DispatchService,
}

fn env(admission: AdmissionPolicy) -> Env {
    let problems = Arc::new(MemoryProblemStore::new());
    problems.insert_problem(
        "two-sum",
        [
            ("python", "import json\n{{USER_CODE}}\n"),
            ("cpp", "#include <iostream>\n{{USER_CODE}}\n"),
        ],
    );
    let submissions = Arc::new(MemorySubmissionStore::new());
    let cache = Arc::new(MemoryCache::new());

    let pipeline = Pipeline::new(
        Arc::new(ScriptedEngine),
        problems.clone(),
        submissions.clone(),
        cache.clone(),
        Arc::new(MarkerGenerator),
    );
    let service = DispatchService::new(
        pipeline,
        admission,
        8,
        Duration::from_secs(5),
        CancellationToken::new(),
    );

    Env {
        problems,
        submissions,
        cache,
        service,
    }
}

fn run(pid: &str, code: &str) -> Vec<u8> {
    serde_json::json!({
        "language": "python",
        "code": code,
        "pid": pid,
        "reqType": "run",
    })
    .to_string()
    .into_bytes()
}

fn submit(pid: &str, problem: &str, code: &str) -> Vec<u8> {
    serde_json::json!({
        "language": "python",
        "code": code,
        "pid": pid,
        "reqType": "submit",
        "queId": problem,
        "email": "dev@example.com",
    })
    .to_string()
    .into_bytes()
}

/// Feeds both streams, closes them, and serves until everything drains.
async fn serve(env: &Env, submit_payloads: Vec<Vec<u8>>, run_payloads: Vec<Vec<u8>>) -> DispatchReport {
    let (submit_tx, submit_source) = memory_stream("code-submission-request", 4);
    let (run_tx, run_source) = memory_stream("code-run-request", 4);

    let feed = |tx: mpsc::Sender<Vec<u8>>, payloads: Vec<Vec<u8>>| {
        tokio::spawn(async move {
            for payload in payloads {
                tx.send(payload).await.unwrap();
            }
        })
    };
    let submit_feed = feed(submit_tx, submit_payloads);
    let run_feed = feed(run_tx, run_payloads);

    let sources: Vec<Box<dyn MessageSource>> = vec![Box::new(submit_source), Box::new(run_source)];
    let report = env.service.serve(sources).await;

    submit_feed.await.unwrap();
    run_feed.await.unwrap();
    report
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn run_request_is_cached_without_submission() {
    let env = env(AdmissionPolicy::Unbounded);

    let report = serve(&env, vec![], vec![run("abc123", "print(1)")]).await;

    assert_eq!(report.admitted, 1);
    assert_eq!(env.cache.get("abc123").as_deref(), Some("1\n"));
    let ttl = env.cache.ttl("abc123").unwrap();
    assert!(ttl <= RESULT_TTL && ttl > RESULT_TTL - Duration::from_secs(10));
    assert!(env.submissions.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn correct_submission_is_persisted_and_counted() {
    let env = env(AdmissionPolicy::Unbounded);

    serve(&env, vec![submit("s1", "two-sum", "# PASS")], vec![]).await;

    let stored = env.submissions.submissions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].problem_id, "two-sum");
    assert_eq!(stored[0].email, "dev@example.com");
    assert_eq!(stored[0].runtime, "0");
    assert_eq!(stored[0].memory, "0");
    assert_eq!(
        env.problems.aggregate("two-sum"),
        Some(ProblemAggregate {
            correct: 1,
            wrong: 0
        })
    );
    assert!(env.cache.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn unparseable_output_leaves_no_trace() {
    let env = env(AdmissionPolicy::Unbounded);

    serve(&env, vec![submit("s1", "two-sum", "x = 1")], vec![]).await;

    assert!(env.submissions.is_empty());
    assert_eq!(
        env.problems.aggregate("two-sum"),
        Some(ProblemAggregate::default())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn malformed_payloads_do_not_stop_ingestion() {
    let env = env(AdmissionPolicy::Unbounded);

    let report = serve(
        &env,
        vec![
            b"{not json".to_vec(),
            br#"{"language":"python","code":"x","pid":"s0","reqType":"submit"}"#.to_vec(),
            submit("s1", "two-sum", "# PASS"),
        ],
        vec![
            br#"{"language":"python","code":"x","pid":"r0","reqType":"compile"}"#.to_vec(),
            run("r1", "print(1)"),
        ],
    )
    .await;

    assert_eq!(report.admitted, 2);
    let rejected: u64 = report.streams.iter().map(|(_, s)| s.rejected).sum();
    assert_eq!(rejected, 3);
    assert_eq!(env.cache.get("r1").as_deref(), Some("1\n"));
    assert_eq!(env.submissions.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn failed_requests_are_dropped_individually() {
    let env = env(AdmissionPolicy::Unbounded);

    serve(
        &env,
        vec![
            // Unknown problem.
            submit("s1", "three-sum", "# PASS"),
            // No Rust template.
            serde_json::json!({
                "language": "rust",
                "code": "// PASS",
                "pid": "s2",
                "reqType": "submit",
                "queId": "two-sum",
            })
            .to_string()
            .into_bytes(),
            // Empty code cannot be generated.
            submit("s3", "two-sum", "   "),
            // Engine failure.
            submit("s4", "two-sum", "# PASS CRASH"),
            submit("s5", "two-sum", "# FAIL"),
        ],
        vec![run("r1", "CRASH"), run("r2", "print(1)")],
    )
    .await;

    let stored = env.submissions.submissions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].pid, "s5");
    assert_eq!(
        env.problems.aggregate("two-sum"),
        Some(ProblemAggregate {
            correct: 0,
            wrong: 1
        })
    );
    assert_eq!(env.cache.get("r1"), None);
    assert_eq!(env.cache.get("r2").as_deref(), Some("1\n"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn persistence_outage_skips_aggregate_update() {
    let env = env(AdmissionPolicy::Unbounded);
    env.submissions.set_unavailable(true);

    serve(
        &env,
        vec![submit("s1", "two-sum", "# PASS"), submit("s2", "two-sum", "# FAIL")],
        vec![],
    )
    .await;

    assert!(env.submissions.is_empty());
    assert_eq!(
        env.problems.aggregate("two-sum"),
        Some(ProblemAggregate::default())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn repeated_run_overwrites_cache_entry() {
    // One worker keeps the two runs ordered.
    let env = env(AdmissionPolicy::Bounded {
        workers: 1,
        queue_size: 4,
    });

    serve(
        &env,
        vec![],
        vec![run("abc123", "print(1)"), run("abc123", "print('done')")],
    )
    .await;

    assert_eq!(env.cache.len(), 1);
    assert_eq!(env.cache.writes(), 2);
    let last = env.cache.get("abc123").unwrap();
    assert!(last.starts_with("Traceback"), "last write should win, got {last:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn identical_run_replaces_entry_and_refreshes_ttl() {
    let env = env(AdmissionPolicy::Bounded {
        workers: 1,
        queue_size: 4,
    });

    serve(&env, vec![], vec![run("abc123", "print(1)")]).await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let first_ttl = env.cache.ttl("abc123").unwrap();

    let report = serve(&env, vec![], vec![run("abc123", "print(1)")]).await;

    assert_eq!(report.admitted, 1);
    assert_eq!(env.cache.len(), 1);
    assert_eq!(env.cache.writes(), 2);
    assert_eq!(env.cache.get("abc123").as_deref(), Some("1\n"));
    assert!(env.cache.ttl("abc123").unwrap() > first_ttl);
}

async fn concurrent_submits_count_exactly(admission: AdmissionPolicy) {
    let env = env(admission);
    let (correct, wrong) = (37_u64, 23_u64);

    let mut payloads = Vec::new();
    for i in 0..correct {
        payloads.push(submit(&format!("c{i}"), "two-sum", "# PASS"));
    }
    for i in 0..wrong {
        payloads.push(submit(&format!("w{i}"), "two-sum", "# FAIL"));
    }

    let report = serve(&env, payloads, vec![]).await;

    assert_eq!(report.admitted, correct + wrong);
    assert_eq!(env.submissions.len() as u64, correct + wrong);
    assert_eq!(
        env.problems.aggregate("two-sum"),
        Some(ProblemAggregate { correct, wrong })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_submits_count_exactly_unbounded() {
    concurrent_submits_count_exactly(AdmissionPolicy::Unbounded).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_submits_count_exactly_bounded() {
    concurrent_submits_count_exactly(AdmissionPolicy::Bounded {
        workers: 4,
        queue_size: 2,
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn shutdown_stops_open_streams() {
    let env = env(AdmissionPolicy::Unbounded);
    let (tx, source) = memory_stream("code-run-request", 4);
    tx.send(run("abc123", "print(1)")).await.unwrap();

    let service = env.service.clone();
    let serving = tokio::spawn(async move {
        let sources: Vec<Box<dyn MessageSource>> = vec![Box::new(source)];
        service.serve(sources).await
    });

    // The request is served while the stream stays open.
    tokio::time::timeout(Duration::from_secs(5), async {
        while env.cache.get("abc123").is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    env.service.shutdown();
    let report = tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.admitted, 1);
    drop(tx);
}

/// Starts every call and never finishes one.
#[derive(Default)]
struct StuckEngine {
    started: tokio::sync::Notify,
}

#[async_trait]
impl ExecutionEngine for StuckEngine {
    async fn execute(&self, _language: &str, _code: &str) -> Result<String> {
        self.started.notify_one();
        std::future::pending().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn shutdown_timeout_bounds_serve_with_stuck_engine() {
    let engine = Arc::new(StuckEngine::default());
    let pipeline = Pipeline::new(
        engine.clone(),
        Arc::new(MemoryProblemStore::new()),
        Arc::new(MemorySubmissionStore::new()),
        Arc::new(MemoryCache::new()),
        Arc::new(MarkerGenerator),
    );
    let service = DispatchService::new(
        pipeline,
        AdmissionPolicy::Bounded {
            workers: 1,
            queue_size: 1,
        },
        8,
        Duration::from_millis(200),
        CancellationToken::new(),
    );

    // One executing, one queued, one blocking the dispatch loop, one buffered.
    let (tx, source) = memory_stream("code-run-request", 4);
    for i in 0..4 {
        tx.send(run(&format!("r{i}"), "print(1)")).await.unwrap();
    }

    let serving = tokio::spawn({
        let service = service.clone();
        async move {
            let sources: Vec<Box<dyn MessageSource>> = vec![Box::new(source)];
            service.serve(sources).await
        }
    });

    engine.started.notified().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    service.shutdown();

    let report = tokio::time::timeout(Duration::from_secs(3), serving)
        .await
        .expect("serve should return once the shutdown timeout elapses")
        .unwrap();

    assert_eq!(report.admitted, 2);
    drop(tx);
}
