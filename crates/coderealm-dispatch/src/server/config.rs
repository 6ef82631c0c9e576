use crate::server::pool::AdmissionPolicy;
use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `coderealm-dispatch` binary.
///
/// These settings name the inbound streams and the backing services, and
/// control how much work the dispatcher admits concurrently. All values are
/// parsed from CLI arguments or environment variables (a `.env` file is loaded
/// first), with defaults matching the production topic and group names.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "coderealm-dispatch",
    version,
    about = "Dispatches run and submit requests to the code execution engine"
)]
pub struct CliArgs {
    /// Redis connection URI, used for both the inbound streams and the
    /// result cache.
    ///
    /// Environment variable: `REDIS_URI`
    #[arg(long, env = "REDIS_URI")]
    pub redis_uri: String,

    /// Postgres connection URL for problems and submissions.
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Execution engine gRPC endpoint.
    ///
    /// Example: "http://127.0.0.1:50051"
    ///
    /// Environment variable: `GRPC_URI_CODE_CLIENT`
    #[arg(long, env = "GRPC_URI_CODE_CLIENT")]
    pub engine_uri: String,

    /// Stream carrying graded submit requests.
    ///
    /// Environment variable: `SUBMIT_STREAM`
    #[arg(long, env = "SUBMIT_STREAM", default_value_t = String::from("code-submission-request"))]
    pub submit_stream: String,

    /// Consumer group for the submit stream.
    ///
    /// Environment variable: `SUBMIT_GROUP`
    #[arg(long, env = "SUBMIT_GROUP", default_value_t = String::from("submission-group"))]
    pub submit_group: String,

    /// Stream carrying ungraded run requests.
    ///
    /// Environment variable: `RUN_STREAM`
    #[arg(long, env = "RUN_STREAM", default_value_t = String::from("code-run-request"))]
    pub run_stream: String,

    /// Consumer group for the run stream.
    ///
    /// Environment variable: `RUN_GROUP`
    #[arg(long, env = "RUN_GROUP", default_value_t = String::from("run-group"))]
    pub run_group: String,

    /// Consumer name within both groups. Must be unique per running instance.
    ///
    /// Environment variable: `CONSUMER_NAME`
    #[arg(long, env = "CONSUMER_NAME", default_value_t = String::from("dispatch-0"))]
    pub consumer_name: String,

    /// Capacity of the shared channel between the ingestors and the dispatch
    /// loop. When full, ingestors stop reading from their streams.
    ///
    /// Environment variable: `HANDOFF_BUFFER_SIZE`
    #[arg(long, env = "HANDOFF_BUFFER_SIZE", default_value_t = 64)]
    pub handoff_buffer_size: usize,

    /// Maximum number of requests processed concurrently.
    ///
    /// `0` spawns one task per request with no ceiling. Any other value runs
    /// a fixed pool of that many workers.
    ///
    /// Environment variable: `MAX_CONCURRENCY`
    #[arg(long, env = "MAX_CONCURRENCY", default_value_t = 0)]
    pub max_concurrency: usize,

    /// Per-worker queue depth when `MAX_CONCURRENCY` is non-zero.
    ///
    /// Environment variable: `WORKER_QUEUE_SIZE`
    #[arg(long, env = "WORKER_QUEUE_SIZE", default_value_t = 1)]
    pub worker_queue_size: usize,

    /// How long a single stream read blocks waiting for new entries, in
    /// milliseconds.
    ///
    /// Environment variable: `STREAM_BLOCK_MS`
    #[arg(long, env = "STREAM_BLOCK_MS", default_value_t = 5_000)]
    pub stream_block_ms: usize,

    /// Maximum Postgres pool size.
    ///
    /// Environment variable: `DB_MAX_CONNECTIONS`
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub db_max_connections: u32,

    /// Seconds to wait for in-flight requests during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,
}

/// One inbound stream and the consumer group reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub stream: String,
    pub group: String,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub redis_uri: String,
    pub database_url: String,
    pub engine_uri: String,
    pub streams: Vec<StreamConfig>,
    pub consumer_name: String,
    pub handoff_buffer_size: usize,
    pub admission: AdmissionPolicy,
    pub stream_block_ms: usize,
    pub db_max_connections: u32,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for DispatchConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        for (name, value) in [
            ("REDIS_URI", &args.redis_uri),
            ("DATABASE_URL", &args.database_url),
            ("GRPC_URI_CODE_CLIENT", &args.engine_uri),
            ("CONSUMER_NAME", &args.consumer_name),
        ] {
            if value.trim().is_empty() {
                bail!("{name} must not be empty");
            }
        }

        if args.submit_stream == args.run_stream {
            bail!(
                "SUBMIT_STREAM and RUN_STREAM must differ (both are {:?})",
                args.submit_stream
            );
        }

        if args.handoff_buffer_size == 0 {
            bail!("HANDOFF_BUFFER_SIZE must be greater than 0");
        }

        let admission = match args.max_concurrency {
            0 => AdmissionPolicy::Unbounded,
            workers => {
                if args.worker_queue_size == 0 {
                    bail!("WORKER_QUEUE_SIZE must be greater than 0");
                }
                AdmissionPolicy::Bounded {
                    workers,
                    queue_size: args.worker_queue_size,
                }
            }
        };

        Ok(Self {
            redis_uri: args.redis_uri,
            database_url: args.database_url,
            engine_uri: args.engine_uri,
            streams: vec![
                StreamConfig {
                    stream: args.submit_stream,
                    group: args.submit_group,
                },
                StreamConfig {
                    stream: args.run_stream,
                    group: args.run_group,
                },
            ],
            consumer_name: args.consumer_name,
            handoff_buffer_size: args.handoff_buffer_size,
            admission,
            stream_block_ms: args.stream_block_ms,
            db_max_connections: args.db_max_connections,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
