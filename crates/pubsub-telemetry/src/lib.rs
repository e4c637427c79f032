//! # Pub/Sub Telemetry
//!
//! Observability for the dispatch pipeline.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` fmt layer, pretty or JSON
//! - **Traces**: delivery spans exported over OTLP, parented on the
//!   publisher's `traceparent` by [`PropagatingTracer`]
//! - **Metrics**: Prometheus counters and histograms via
//!   [`PrometheusDispatchMetrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pubsub_telemetry::{init_telemetry, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).await?;
//!     // Register subscriptions and serve traffic.
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `pubsub-node` | Service name in traces |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `http://localhost:4317` | OTLP collector endpoint |
//! | `PUBSUB_OTLP_ENABLED` | `false` | Export spans over OTLP |
//! | `PUBSUB_LOG_LEVEL` | `info` | Log level filter |
//! | `PUBSUB_JSON_LOGS` | `false` | JSON log output |

mod config;
mod context;
mod logging;
mod metrics;
mod propagation;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use context::{inject_current, PropagatedContext};
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, PrometheusDispatchMetrics, DELIVERIES,
    HANDLER_DURATION,
};
pub use propagation::PropagatingTracer;
pub use tracing_setup::TracingGuard;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize OpenTelemetry tracer: {0}")]
    TracerInit(String),

    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging, optional OTLP tracing and metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
/// When dropped, it flushes pending spans.
pub async fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;

    let tracing = if config.otlp_enabled {
        Some(tracing_setup::init_tracing(&config).await?)
    } else {
        init_logging(&config)?;
        None
    };

    Ok(TelemetryGuard {
        _tracing: tracing,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active. Drop to flush and shutdown.
pub struct TelemetryGuard {
    _tracing: Option<TracingGuard>,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}
