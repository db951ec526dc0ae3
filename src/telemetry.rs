//! Logging and trace export setup.

use anyhow::Context as _;
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
};
use opentelemetry_semantic_conventions::{SCHEMA_URL, attribute};
use tracing_subscriber::{
    EnvFilter,
    fmt::format::FmtSpan,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LoggingFormat, TelemetryConfig};

/// Flushes pending spans when dropped. Hold it for the life of `main`.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(err) = provider.shutdown()
        {
            eprintln!("failed to flush traces: {err:?}");
        }
    }
}

fn resource(service_name: &str) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_schema_url(
            [KeyValue::new(
                attribute::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            SCHEMA_URL,
        )
        .build()
}

fn tracer_provider(service_name: &str) -> anyhow::Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .context("building OTLP span exporter")?;

    Ok(SdkTracerProvider::builder()
        .with_sampler(Sampler::ParentBased(Box::new(Sampler::AlwaysOn)))
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource(service_name))
        .with_batch_exporter(exporter)
        .build())
}

/// The filter used when `RUST_LOG` is unset.
fn default_directives(config: &TelemetryConfig) -> String {
    format!(
        "{},axum={},hyper={}",
        tracing::Level::from(config.level),
        tracing::Level::from(config.axum_level),
        tracing::Level::from(config.axum_level),
    )
}

/// Installs the global subscriber.
///
/// `RUST_LOG` overrides the configured levels. With `otlp_enabled`, spans
/// are also exported over OTLP/gRPC (endpoint from the standard
/// `OTEL_EXPORTER_OTLP_*` variables) and W3C trace context is propagated.
///
/// # Errors
/// Fails if the OTLP exporter can't be built.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config)));

    let fmt_layer = match config.format {
        LoggingFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .boxed(),
        LoggingFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .boxed(),
    };

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    if !config.otlp_enabled {
        registry.init();
        return Ok(TelemetryGuard {
            tracer_provider: None,
        });
    }

    opentelemetry::global::set_text_map_propagator(
        opentelemetry_sdk::propagation::TraceContextPropagator::new(),
    );
    let provider = tracer_provider(&config.service_name)?;
    let tracer = provider.tracer(config.service_name.clone());

    registry
        .with(tracing_opentelemetry::OpenTelemetryLayer::new(tracer))
        .init();

    Ok(TelemetryGuard {
        tracer_provider: Some(provider),
    })
}
