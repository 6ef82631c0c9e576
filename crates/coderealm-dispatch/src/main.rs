use clap::Parser;
use coderealm_dispatch::{
    codegen::MarkerGenerator,
    engine::GrpcEngine,
    ingest::{MessageSource, redis::RedisStreamSource},
    pipeline::Pipeline,
    server::{
        config::{CliArgs, DispatchConfig},
        service::handler::DispatchService,
        telemetry::init_telemetry,
    },
    store::{
        postgres::{PgProblemStore, PgSubmissionStore, create_pool},
        redis::RedisCache,
    },
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DispatchConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let cache = RedisCache::connect(&config.redis_uri).await?;
    match cache.ping().await {
        Ok(pong) => tracing::info!("Connected to Redis: {pong}"),
        Err(e) => tracing::warn!("Redis ping failed: {e}"),
    }

    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Connected to Postgres");

    let engine = GrpcEngine::connect_lazy(&config.engine_uri)?;

    let pipeline = Pipeline::new(
        Arc::new(engine),
        Arc::new(PgProblemStore::new(pool.clone())),
        Arc::new(PgSubmissionStore::new(pool.clone())),
        Arc::new(cache),
        Arc::new(MarkerGenerator),
    );

    let mut sources: Vec<Box<dyn MessageSource>> = Vec::with_capacity(config.streams.len());
    for stream in &config.streams {
        let source = RedisStreamSource::connect(
            &config.redis_uri,
            stream,
            &config.consumer_name,
            config.stream_block_ms,
        )
        .await?;
        sources.push(Box::new(source));
    }

    let service = DispatchService::from_config(&config, pipeline, CancellationToken::new());
    tokio::spawn(shutdown_signal(service.clone()));

    let report = service.serve(sources).await;
    for (stream, stats) in &report.streams {
        tracing::info!(
            stream = %stream,
            received = stats.received,
            forwarded = stats.forwarded,
            rejected = stats.rejected,
            "Stream summary"
        );
    }

    pool.close().await;
    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &DispatchConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting dispatcher with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting dispatcher as {} with admission {:?}",
            config.consumer_name,
            config.admission
        );
    }
}

async fn shutdown_signal(service: DispatchService) {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
    service.shutdown();
}
