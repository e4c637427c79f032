//! Delivery spans on top of the `tracing` crate.
//!
//! Any subscriber layer (fmt, OpenTelemetry) picks these spans up. Outcome
//! fields are recorded when the span is finished.

use crate::domain::{MessageSpan, SpanOutcome};
use crate::error::TraceError;
use crate::ports::{SpanHandle, Tracer};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::field::Empty;

/// Name of the span opened for every delivery attempt.
pub const MESSAGE_SPAN_NAME: &str = "pubsub.message";

/// [`Tracer`] that opens one `tracing` span per delivery attempt.
#[derive(Debug, Default)]
pub struct TracingTracer {
    next_id: AtomicU64,
}

impl TracingTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for TracingTracer {
    fn in_active_trace(&self) -> bool {
        tracing::Span::current()
            .metadata()
            .is_some_and(|m| m.name() == MESSAGE_SPAN_NAME)
    }

    fn begin_span(&self, request: &MessageSpan) -> Result<SpanHandle, TraceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let span = tracing::info_span!(
            "pubsub.message",
            otel.kind = "consumer",
            operation = request.kind.as_str(),
            service = %request.service,
            topic = %request.topic,
            subscription = %request.subscription,
            msg_id = %request.message_id,
            delivery_attempt = request.attempt,
            published = %request.published.to_rfc3339(),
            trace_idx = request.trace_idx,
            outcome = Empty,
            error.code = Empty,
            error.message = Empty,
        );

        Ok(SpanHandle::new(id, span))
    }

    fn finish_span(&self, handle: SpanHandle, outcome: SpanOutcome<'_>) {
        let span = handle.span();
        match outcome {
            SpanOutcome::Ok => {
                span.record("outcome", "ok");
            }
            SpanOutcome::Err(err) => {
                span.record("outcome", "error");
                span.record("error.code", err.code().as_str());
                span.record("error.message", tracing::field::display(err));
            }
            SpanOutcome::Cancelled => {
                span.record("outcome", "cancelled");
            }
        }
    }
}
