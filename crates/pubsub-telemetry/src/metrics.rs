//! Prometheus metrics for delivery outcomes.
//!
//! All metrics follow the naming convention: `pubsub_<metric>_<unit>`
//!
//! - `pubsub_deliveries_total{topic, subscription, outcome}`: one increment
//!   per delivery attempt.
//! - `pubsub_handler_duration_seconds{topic, subscription}`: time spent in
//!   the subscriber's handler. Attempts that never reached the handler are
//!   not observed.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use pubsub_core::domain::{DeliveryOutcome, SubscriptionDescriptor};
use pubsub_core::ports::DispatchMetrics;
use std::time::Duration;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    /// Delivery attempts by outcome
    pub static ref DELIVERIES: IntCounterVec = IntCounterVec::new(
        Opts::new("pubsub_deliveries_total", "Delivery attempts by outcome"),
        &["topic", "subscription", "outcome"]
    ).expect("metric creation failed");

    /// Handler execution duration
    pub static ref HANDLER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "pubsub_handler_duration_seconds",
            "Time spent in the subscriber handler per delivery attempt"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets")),
        &["topic", "subscription"]
    ).expect("metric creation failed");
}

/// Handle proving the metrics are registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _private: (),
}

/// Register all metrics with the global registry.
///
/// Registering twice is not an error.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(DELIVERIES.clone()),
        Box::new(HANDLER_DURATION.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _private: () })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// [`DispatchMetrics`] backed by the global Prometheus metrics.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusDispatchMetrics {
    _handle: MetricsHandle,
}

impl PrometheusDispatchMetrics {
    /// Register the metrics and return a sink that records into them.
    pub fn new() -> Result<Self, TelemetryError> {
        Ok(Self {
            _handle: register_metrics()?,
        })
    }
}

impl DispatchMetrics for PrometheusDispatchMetrics {
    fn record_outcome(
        &self,
        descriptor: &SubscriptionDescriptor,
        outcome: DeliveryOutcome,
        elapsed: Duration,
    ) {
        DELIVERIES
            .with_label_values(&[
                descriptor.topic.as_str(),
                descriptor.subscription.as_str(),
                outcome.as_str(),
            ])
            .inc();
        if outcome.handler_ran() {
            HANDLER_DURATION
                .with_label_values(&[descriptor.topic.as_str(), descriptor.subscription.as_str()])
                .observe(elapsed.as_secs_f64());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_twice() {
        register_metrics().unwrap();
        register_metrics().unwrap();
    }

    #[test]
    fn test_record_outcome() {
        let metrics = PrometheusDispatchMetrics::new().unwrap();
        let descriptor = SubscriptionDescriptor::test_stub("metrics-topic", "metrics-sub");

        metrics.record_outcome(&descriptor, DeliveryOutcome::Acked, Duration::from_millis(3));
        metrics.record_outcome(&descriptor, DeliveryOutcome::Panicked, Duration::from_millis(1));
        metrics.record_outcome(&descriptor, DeliveryOutcome::Panicked, Duration::from_millis(1));

        let panicked = DELIVERIES
            .with_label_values(&["metrics-topic", "metrics-sub", "panicked"])
            .get();
        assert_eq!(panicked, 2);

        let text = encode_metrics().unwrap();
        assert!(text.contains("pubsub_deliveries_total"));
        assert!(text.contains("pubsub_handler_duration_seconds"));
    }

    #[test]
    fn test_decode_failure_not_timed() {
        let metrics = PrometheusDispatchMetrics::new().unwrap();
        let descriptor = SubscriptionDescriptor::test_stub("metrics-topic", "decode-only");

        metrics.record_outcome(&descriptor, DeliveryOutcome::DecodeError, Duration::ZERO);
        metrics.record_outcome(&descriptor, DeliveryOutcome::Acked, Duration::from_millis(2));

        let observed = HANDLER_DURATION
            .with_label_values(&["metrics-topic", "decode-only"])
            .get_sample_count();
        assert_eq!(observed, 1);
    }
}
