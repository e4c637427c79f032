//! W3C trace context carried in message attributes.
//!
//! A publisher stores its current span as a `traceparent` attribute; the
//! subscriber side parses it back and parents the delivery span on it.
//!
//! ```text
//! traceparent: 00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01
//!              ^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^ ^^^^^^^^^^^^^^^^ ^^
//!           version          trace id                 span id      flags
//! ```

use opentelemetry::{
    trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState},
    Context,
};
use pubsub_core::domain::TRACEPARENT_ATTRIBUTE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const SUPPORTED_VERSION: &str = "00";

/// Trace context that can be sent across process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagatedContext {
    /// Trace ID (32 hex characters)
    pub trace_id: String,
    /// Parent span ID (16 hex characters)
    pub span_id: String,
    /// Trace flags (sampled, etc.)
    pub trace_flags: u8,
}

impl PropagatedContext {
    /// Create an empty context (no parent trace)
    pub fn empty() -> Self {
        Self {
            trace_id: "00000000000000000000000000000000".to_string(),
            span_id: "0000000000000000".to_string(),
            trace_flags: 0,
        }
    }

    /// Check if this context is valid (has a real trace)
    pub fn is_valid(&self) -> bool {
        !self.trace_id.chars().all(|c| c == '0') && !self.span_id.chars().all(|c| c == '0')
    }

    /// Parse a `traceparent` header value. Returns `None` for malformed or
    /// all-zero identifiers.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some() || version != SUPPORTED_VERSION {
            return None;
        }
        if !is_lower_hex(trace_id, 32) || !is_lower_hex(span_id, 16) || !is_lower_hex(flags, 2) {
            return None;
        }

        let context = Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            trace_flags: u8::from_str_radix(flags, 16).ok()?,
        };
        context.is_valid().then_some(context)
    }

    /// Format as a `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!(
            "{}-{}-{}-{:02x}",
            SUPPORTED_VERSION, self.trace_id, self.span_id, self.trace_flags
        )
    }

    /// Context of a `tracing` span, as seen by the OpenTelemetry layer.
    ///
    /// Empty when no OpenTelemetry layer is installed.
    pub fn from_span(span: &tracing::Span) -> Self {
        let context = span.context();
        let span_context = context.span().span_context().clone();
        if !span_context.is_valid() {
            return Self::empty();
        }

        Self {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
            trace_flags: span_context.trace_flags().to_u8(),
        }
    }

    /// Convert to an OpenTelemetry context holding a remote parent.
    pub fn to_otel_context(&self) -> Context {
        if !self.is_valid() {
            return Context::new();
        }

        let trace_id = TraceId::from_hex(&self.trace_id).unwrap_or(TraceId::INVALID);
        let span_id = SpanId::from_hex(&self.span_id).unwrap_or(SpanId::INVALID);
        let span_context = SpanContext::new(
            trace_id,
            span_id,
            TraceFlags::new(self.trace_flags),
            true, // remote = true (came from another process)
            TraceState::default(),
        );

        Context::new().with_remote_span_context(span_context)
    }
}

/// Add the current span's `traceparent` to outgoing message attributes.
///
/// Leaves `attributes` untouched when there is no active trace.
pub fn inject_current(attributes: &mut HashMap<String, String>) {
    let context = PropagatedContext::from_span(&tracing::Span::current());
    if context.is_valid() {
        attributes.insert(TRACEPARENT_ATTRIBUTE.to_string(), context.to_traceparent());
    }
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
