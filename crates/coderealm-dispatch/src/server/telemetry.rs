//! Logging, tracing, and metrics setup.
//!
//! Logs always go to the console through a `tracing_subscriber::fmt` layer
//! filtered by `RUST_LOG`. OpenTelemetry export is opt-in per cargo feature:
//!
//! - `traces` exports spans; events inside a span become span events
//! - `metrics` exports the dispatch counters below
//! - `honeycomb` sends either of them over OTLP/gRPC, configured from
//!   `HONEYCOMB_API_KEY`, `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and
//!   `HONEYCOMB_COMPRESSION`
//! - `stdout` prints either of them locally
//!
//! ```bash
//! cargo run --features traces,metrics,honeycomb
//! ```
//!
//! The metric helpers at the bottom compile to no-ops without `metrics`, so
//! the pipeline calls them unconditionally. Aggregate failures get their own
//! counter so submissions persisted without a matching counter increment can
//! be alerted on.

#[cfg(all(
    any(feature = "honeycomb", feature = "stdout"),
    not(any(feature = "traces", feature = "metrics"))
))]
compile_error!("Exporters require at least one of the 'traces' or 'metrics' features.");

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
#[cfg(feature = "traces")]
use opentelemetry::trace::TracerProvider;
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_sdk::Resource;
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "traces")]
use opentelemetry_sdk::trace as sdktrace;
#[cfg(any(feature = "metrics", feature = "traces"))]
use opentelemetry_semantic_conventions as semvcns;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

const SERVICE_NAME: &str = "coderealm-dispatch";

pub struct TelemetryProviders {
    #[cfg(feature = "traces")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes pending spans and metrics and shuts the exporters down.
    ///
    /// Errors are printed to stderr since the subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "traces")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "traces")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "traces"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "traces")]
    let registry = {
        opentelemetry::global::set_text_map_propagator(
            opentelemetry_sdk::propagation::TraceContextPropagator::new(),
        );
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        Instruments::install(&opentelemetry::global::meter_with_scope(scope));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "traces")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "traces"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

/// Connection settings shared by the Honeycomb span and metric exporters.
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "traces")))]
mod honeycomb {
    use anyhow::Context;
    use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
    use std::str::FromStr;
    use tonic::{metadata::MetadataMap, transport::ClientTlsConfig};

    const EXPORT_TIMEOUT: core::time::Duration = core::time::Duration::from_secs(10);

    pub(super) struct Target {
        metadata: MetadataMap,
        endpoint: String,
        compression: Compression,
    }

    impl Target {
        pub(super) fn from_env() -> anyhow::Result<Self> {
            let var = |name: &str| std::env::var(name).with_context(|| format!("missing `{name}`"));

            let mut metadata = MetadataMap::new();
            metadata.insert(
                "x-honeycomb-team",
                var("HONEYCOMB_API_KEY")?.parse().context("invalid API key")?,
            );
            metadata.insert(
                "x-honeycomb-dataset",
                var("HONEYCOMB_DATASET")?.parse().context("invalid dataset")?,
            );

            Ok(Self {
                metadata,
                endpoint: var("HONEYCOMB_ENDPOINT")?,
                compression: Compression::from_str(
                    &var("HONEYCOMB_COMPRESSION")?.to_ascii_lowercase(),
                )?,
            })
        }

        /// Points a tonic OTLP exporter builder at Honeycomb.
        pub(super) fn configure<B>(self, builder: B) -> B
        where
            B: WithExportConfig + WithTonicConfig,
        {
            builder
                .with_tls_config(ClientTlsConfig::new().with_native_roots())
                .with_metadata(self.metadata)
                .with_compression(self.compression)
                .with_timeout(EXPORT_TIMEOUT)
                .with_endpoint(self.endpoint)
                .with_protocol(Protocol::Grpc)
        }
    }
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_reader(
        sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(core::time::Duration::from_secs(5))
            .build(),
    );

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let exporter = honeycomb::Target::from_env()?
            .configure(opentelemetry_otlp::MetricExporter::builder().with_tonic())
            .with_temporality(sdkmetrics::Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "traces")]
fn batch<E: opentelemetry_sdk::trace::SpanExporter + 'static>(
    exporter: E,
) -> sdktrace::BatchSpanProcessor {
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(core::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "traces")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = builder.with_span_processor(batch(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let exporter = honeycomb::Target::from_env()?
            .configure(opentelemetry_otlp::SpanExporter::builder().with_tonic())
            .build()
            .context("failed to build tracer exporter")?;
        builder.with_span_processor(batch(exporter))
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
struct Instruments {
    requests_received: Counter<u64>,
    decode_errors: Counter<u64>,
    pipeline_aborts: Counter<u64>,
    cache_writes: Counter<u64>,
    submissions_persisted: Counter<u64>,
    aggregate_errors: Counter<u64>,
    workers_inflight: UpDownCounter<i64>,
    pipeline_duration_ms: Histogram<f64>,
}

#[cfg(feature = "metrics")]
static INSTRUMENTS: OnceLock<Instruments> = OnceLock::new();

#[cfg(feature = "metrics")]
impl Instruments {
    fn install(meter: &opentelemetry::metrics::Meter) {
        let counter = |name: &'static str, description: &'static str| {
            meter.u64_counter(name).with_description(description).build()
        };

        let _ = INSTRUMENTS.set(Self {
            requests_received: counter(
                "requests_received",
                "Messages read from the inbound streams",
            ),
            decode_errors: counter("decode_errors", "Inbound messages dropped as malformed"),
            pipeline_aborts: counter(
                "pipeline_aborts",
                "Requests dropped by the pipeline, by error kind",
            ),
            cache_writes: counter("cache_writes", "Run outputs written to the result cache"),
            submissions_persisted: counter("submissions_persisted", "Graded submissions inserted"),
            aggregate_errors: counter(
                "aggregate_errors",
                "Persisted submissions whose counter increment failed",
            ),
            workers_inflight: meter
                .i64_up_down_counter("workers_inflight")
                .with_description("Requests currently inside the pipeline")
                .build(),
            pipeline_duration_ms: meter
                .f64_histogram("pipeline_duration")
                .with_unit("ms")
                .with_description("End-to-end pipeline duration per request")
                .build(),
        });
    }
}

/// Declares a metric helper that records through `INSTRUMENTS` when the
/// `metrics` feature is on and does nothing otherwise.
macro_rules! metric_fn {
    ($name:ident($($arg:ident: $ty:ty),*) => |$m:ident| $record:expr) => {
        #[cfg(feature = "metrics")]
        pub fn $name($($arg: $ty),*) {
            if let Some($m) = INSTRUMENTS.get() {
                $record;
            }
        }

        #[cfg(not(feature = "metrics"))]
        pub fn $name($(_: $ty),*) {}
    };
}

metric_fn!(increment_requests_received(stream: &str) => |m| m
    .requests_received
    .add(1, &[KeyValue::new("stream", stream.to_string())]));

metric_fn!(increment_decode_errors(stream: &str) => |m| m
    .decode_errors
    .add(1, &[KeyValue::new("stream", stream.to_string())]));

metric_fn!(increment_pipeline_aborts(kind: &'static str) => |m| m
    .pipeline_aborts
    .add(1, &[KeyValue::new("kind", kind)]));

metric_fn!(increment_cache_writes() => |m| m.cache_writes.add(1, &[]));

metric_fn!(increment_submissions_persisted(field: &'static str) => |m| m
    .submissions_persisted
    .add(1, &[KeyValue::new("counter", field)]));

metric_fn!(increment_aggregate_errors(kind: &'static str) => |m| m
    .aggregate_errors
    .add(1, &[KeyValue::new("kind", kind)]));

metric_fn!(increment_workers_inflight() => |m| m.workers_inflight.add(1, &[]));

metric_fn!(decrement_workers_inflight() => |m| m.workers_inflight.add(-1, &[]));

metric_fn!(record_pipeline_duration(duration_ms: f64) => |m| m
    .pipeline_duration_ms
    .record(duration_ms, &[]));
