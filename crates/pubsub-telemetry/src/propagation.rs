//! Delivery tracer that continues the publisher's trace.

use pubsub_core::adapters::TracingTracer;
use pubsub_core::domain::{MessageSpan, SpanOutcome};
use pubsub_core::error::TraceError;
use pubsub_core::ports::{SpanHandle, Tracer};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::PropagatedContext;

/// [`TracingTracer`] that parents each delivery span on the `traceparent`
/// the publisher attached, when there is a valid one.
#[derive(Debug, Default)]
pub struct PropagatingTracer {
    inner: TracingTracer,
}

impl PropagatingTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tracer for PropagatingTracer {
    fn in_active_trace(&self) -> bool {
        self.inner.in_active_trace()
    }

    fn begin_span(&self, request: &MessageSpan) -> Result<SpanHandle, TraceError> {
        let handle = self.inner.begin_span(request)?;

        if let Some(parent) = request
            .traceparent
            .as_deref()
            .and_then(PropagatedContext::from_traceparent)
        {
            handle.span().set_parent(parent.to_otel_context());
        } else if request.traceparent.is_some() {
            tracing::debug!(
                msg_id = %request.message_id,
                "Ignoring malformed traceparent attribute"
            );
        }

        Ok(handle)
    }

    fn finish_span(&self, handle: SpanHandle, outcome: SpanOutcome<'_>) {
        self.inner.finish_span(handle, outcome);
    }
}
