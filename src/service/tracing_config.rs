use std::time::Duration;

use dotenv::dotenv;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SpanLimits;
use opentelemetry_sdk::{
    metrics::{
        reader::{DefaultAggregationSelector, DefaultTemporalitySelector},
        MeterProviderBuilder, PeriodicReader, SdkMeterProvider,
    },
    runtime,
    trace::{BatchConfigBuilder, RandomIdGenerator, Sampler, Tracer},
    Resource,
};
use opentelemetry_semantic_conventions::{
    resource::{SERVICE_NAME, SERVICE_VERSION},
    SCHEMA_URL,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_opentelemetry::{MetricsLayer, OpenTelemetryLayer};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use super::{AppError, AppResult, LogConfig};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn gateway_resource() -> Resource {
    Resource::from_schema_url(
        [
            KeyValue::new(SERVICE_NAME, env!("CARGO_PKG_NAME")),
            KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
        ],
        SCHEMA_URL,
    )
}

/// Meter provider feeding the `monotonic_counter.*` session counters to the
/// collector at `log.otlp_endpoint`.
fn session_meter_provider(conf: &LogConfig) -> AppResult<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(conf.otlp_endpoint.as_str())
        .build_metrics_exporter(
            Box::new(DefaultAggregationSelector::new()),
            Box::new(DefaultTemporalitySelector::new()),
        )
        .map_err(|e| AppError::IllegalStateError(format!("otlp metrics exporter: {}", e)))?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(Duration::from_secs(conf.metrics_interval_secs))
        .build();
    let meter_provider = MeterProviderBuilder::default()
        .with_resource(gateway_resource())
        .with_reader(reader)
        .build();
    global::set_meter_provider(meter_provider.clone());

    Ok(meter_provider)
}

/// Batch tracer exporting the `session` spans.
fn session_tracer(conf: &LogConfig) -> AppResult<Tracer> {
    let trace_config = opentelemetry_sdk::trace::Config::default()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
            conf.trace_sample_ratio,
        ))))
        .with_id_generator(RandomIdGenerator::default())
        .with_span_limits(SpanLimits::default())
        .with_resource(gateway_resource());

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_scheduled_delay(Duration::from_secs(conf.trace_batch_delay_secs))
                .build(),
        )
        .with_trace_config(trace_config)
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(conf.otlp_endpoint.as_str()),
        )
        .install_batch(runtime::Tokio)
        .map_err(|e| AppError::IllegalStateError(format!("otlp tracer: {}", e)))
}

/// Keeps the log file writer and, when exporting, the OTLP providers alive.
/// Dropping it flushes them.
pub struct OtelGuard {
    meter_provider: Option<SdkMeterProvider>,
    _worker_guard: WorkerGuard,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        let Some(meter_provider) = self.meter_provider.take() else {
            return;
        };
        if let Err(err) = meter_provider.shutdown() {
            eprintln!("{err:?}");
        }
        global::shutdown_tracer_provider();
        info!("otlp exporters shut down");
    }
}

/// Console-only logging, filtered by `RUST_LOG`. Used by tests and by the
/// binary when no collector is around.
pub fn setup_local_tracing() -> AppResult<()> {
    dotenv().ok();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_line_number(true);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| AppError::IllegalStateError(format!("tracing already set up: {}", e)))
}

/// Full setup: hourly rolling file under `log.dir` teed with stdout, plus OTLP
/// traces and session counters unless `log.otlp_endpoint` is empty.
///
/// Must be called inside a tokio runtime; the exporters run on it.
pub async fn setup_tracing(conf: &LogConfig) -> AppResult<OtelGuard> {
    let file_appender = tracing_appender::rolling::hourly(&conf.dir, &conf.file_prefix);
    let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
        .with_target(true)
        .with_thread_names(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(conf.ansi)
        .with_writer(non_blocking.and(std::io::stdout));

    let (meter_provider, tracer) = if conf.exports_enabled() {
        (
            Some(session_meter_provider(conf)?),
            Some(session_tracer(conf)?),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(meter_provider.clone().map(MetricsLayer::new))
        .with(tracer.map(OpenTelemetryLayer::new))
        .with(EnvFilter::from_default_env())
        .try_init()
        .map_err(|e| AppError::IllegalStateError(format!("tracing already set up: {}", e)))?;

    if meter_provider.is_some() {
        info!(endpoint = %conf.otlp_endpoint, "exporting traces and metrics");
    } else {
        info!("otlp export disabled, logging to {}", conf.dir);
    }

    Ok(OtelGuard {
        meter_provider,
        _worker_guard: worker_guard,
    })
}
