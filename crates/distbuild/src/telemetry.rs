//! OpenTelemetry trace export, narrowed to the one signal this binary
//! actually needs.
//!
//! §1 treats "telemetry counters" and "logging event sinks" as external
//! collaborators the core only emits structured events toward; metrics and
//! log export are out of scope here, but the ambient stack still carries a
//! trace exporter because every `tracing::info!`/`warn!` call this crate and
//! `distproto` make is already a span-shaped event. OTLP is wired in this
//! binary crate rather than in the library crates.

use anyhow::{Context, Result};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize a `tracing_subscriber::Registry` with an env-filter layer, a
/// plain fmt layer, and (when `otlp_endpoint` is non-empty) an OTLP trace
/// layer. Called exactly once at process start, before any other crate logs.
pub fn init(log_level: &str, otlp_endpoint: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    if otlp_endpoint.is_empty() {
        registry.init();
        return Ok(());
    }

    let resource = Resource::builder_empty()
        .with_service_name("distbuild")
        .with_attributes(vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
        .build();

    let endpoint = format!("http://{otlp_endpoint}");
    let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP span exporter")?;

    let batch_processor = opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build();
    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_span_processor(batch_processor)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = tracer_provider.tracer("distbuild");
    opentelemetry::global::set_tracer_provider(tracer_provider);

    registry.with(tracing_opentelemetry::layer().with_tracer(tracer)).init();
    tracing::info!(otlp_endpoint, "OpenTelemetry trace export initialized");
    Ok(())
}
