//! Logging and OpenTelemetry initialization.
//!
//! Structured logs always go to stdout through `tracing-subscriber`. When an
//! OTLP endpoint is configured, spans are additionally exported through a
//! batch processor. Connection to the collector is lazy: an unreachable
//! collector never blocks startup.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};
use std::time::Duration;
use thiserror::Error;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Filter used when neither `RUST_LOG` nor an explicit directive is set.
pub const DEFAULT_LOG_FILTER: &str = "info,supernode=debug";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to build OTLP exporter: {0}")]
    ExporterBuild(#[from] opentelemetry_otlp::ExporterBuildError),

    #[error("Invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to set global subscriber: {0}")]
    SetSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Configuration for telemetry.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for OTEL resource attributes.
    pub service_name: String,
    /// Log filter directive. `RUST_LOG` wins when set.
    pub log_filter: Option<String>,
    /// OTLP endpoint (e.g., "http://localhost:4317").
    pub otlp_endpoint: Option<String>,
    /// Sampling ratio (0.0 to 1.0).
    pub sampling_ratio: f64,
    /// Additional resource attributes.
    pub resource_attributes: Vec<(String, String)>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "supernode".to_string(),
            log_filter: None,
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            resource_attributes: vec![],
        }
    }
}

fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    Ok(EnvFilter::try_new(directive)?)
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let mut resource_attrs = vec![
        opentelemetry::KeyValue::new(SERVICE_NAME, config.service_name.clone()),
        opentelemetry::KeyValue::new(SERVICE_VERSION, env!("CARGO_PKG_VERSION")),
    ];
    for (key, value) in &config.resource_attributes {
        resource_attrs.push(opentelemetry::KeyValue::new(key.clone(), value.clone()));
    }
    let resource = Resource::builder().with_attributes(resource_attrs).build();

    let env_filter = build_filter(config)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    let (otel_layer, tracer_provider) = if let Some(endpoint) = &config.otlp_endpoint {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;

        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_sampler(Sampler::TraceIdRatioBased(config.sampling_ratio))
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource)
            .build();

        let tracer = tracer_provider.tracer("supernode");
        (Some(OpenTelemetryLayer::new(tracer)), Some(tracer_provider))
    } else {
        (None, None)
    };

    let subscriber = Registry::default()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer);

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(TelemetryGuard { tracer_provider })
}

/// Flushes and shuts down span export.
///
/// Call [`shutdown`](Self::shutdown) before exit to flush pending spans; the
/// `Drop` impl is a fallback that cannot wait.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Flush pending spans, waiting at most 5 seconds.
    pub async fn shutdown(mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            let _ = tokio::time::timeout(
                Duration::from_secs(5),
                tokio::task::spawn_blocking(move || {
                    let _ = provider.shutdown();
                }),
            )
            .await;
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            let _ = provider.shutdown();
        }
    }
}
