//! # Delivery Attempts
//!
//! Per-attempt values: what the broker hands over, what the handler sees,
//! and what the tracer records. None of these outlive one pipeline run.

use crate::domain::topic::SubscriptionDescriptor;
use crate::error::DispatchError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Attribute carrying a W3C `traceparent` header from the publisher.
pub const TRACEPARENT_ATTRIBUTE: &str = "traceparent";

/// One broker delivery of one message to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryAttempt {
    /// Broker-assigned message identifier.
    pub message_id: String,
    /// When the message was published.
    pub publish_time: DateTime<Utc>,
    /// Attempt number, starting at 1.
    pub attempt: u32,
    /// Transport attributes.
    pub attributes: HashMap<String, String>,
    /// Raw message body.
    pub payload: Vec<u8>,
}

impl DeliveryAttempt {
    /// First attempt of a message published now with no attributes.
    pub fn new(message_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            publish_time: Utc::now(),
            attempt: 1,
            attributes: HashMap::new(),
            payload: payload.into(),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_publish_time(mut self, publish_time: DateTime<Utc>) -> Self {
        self.publish_time = publish_time;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Look up a transport attribute.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Context handed to a message handler.
///
/// Cancellation belongs to the broker: the pipeline never cancels a handler
/// itself, it only forwards the token.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    cancel: CancellationToken,
    topic: Arc<str>,
    subscription: Arc<str>,
    message_id: Arc<str>,
    attempt: u32,
    publish_time: DateTime<Utc>,
}

impl DeliveryContext {
    pub(crate) fn new(
        cancel: CancellationToken,
        descriptor: &SubscriptionDescriptor,
        attempt: &DeliveryAttempt,
    ) -> Self {
        Self {
            cancel,
            topic: Arc::from(descriptor.topic.as_str()),
            subscription: Arc::from(descriptor.subscription.as_str()),
            message_id: Arc::from(attempt.message_id.as_str()),
            attempt: attempt.attempt,
            publish_time: attempt.publish_time,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Attempt number, starting at 1.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub fn publish_time(&self) -> DateTime<Utc> {
        self.publish_time
    }

    /// Whether the broker has asked for this delivery to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the broker cancels this delivery.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The broker's cancellation token, for handing to child tasks.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Kind of traced operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    PubSubMessage,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PubSubMessage => "pubsub_message",
        }
    }
}

/// Everything a tracer needs to open the span for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSpan {
    pub kind: OperationKind,
    pub service: String,
    pub topic: String,
    pub subscription: String,
    pub message_id: String,
    pub attempt: u32,
    pub published: DateTime<Utc>,
    pub trace_idx: u32,
    /// Remote parent, when the publisher propagated one.
    pub traceparent: Option<String>,
}

impl MessageSpan {
    pub(crate) fn for_attempt(descriptor: &SubscriptionDescriptor, attempt: &DeliveryAttempt) -> Self {
        Self {
            kind: OperationKind::PubSubMessage,
            service: descriptor.service_name.clone(),
            topic: descriptor.topic.clone(),
            subscription: descriptor.subscription.clone(),
            message_id: attempt.message_id.clone(),
            attempt: attempt.attempt,
            published: attempt.publish_time,
            trace_idx: descriptor.trace_idx,
            traceparent: attempt.attribute(TRACEPARENT_ATTRIBUTE).map(str::to_string),
        }
    }
}

/// How a span ended.
#[derive(Debug, Clone, Copy)]
pub enum SpanOutcome<'a> {
    Ok,
    Err(&'a DispatchError),
    /// The pipeline was dropped before the handler finished.
    Cancelled,
}

impl<'a> SpanOutcome<'a> {
    pub(crate) fn from_result(result: &'a Result<(), DispatchError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(err) => Self::Err(err),
        }
    }
}

/// Delivery result as reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    Acked,
    HandlerError,
    Panicked,
    DecodeError,
    TraceError,
}

impl DeliveryOutcome {
    #[must_use]
    pub fn from_result(result: &Result<(), DispatchError>) -> Self {
        match result {
            Ok(()) => Self::Acked,
            Err(DispatchError::Handler(_)) => Self::HandlerError,
            Err(DispatchError::Panicked(_)) => Self::Panicked,
            Err(DispatchError::Decode(_)) => Self::DecodeError,
            Err(DispatchError::Trace(_)) => Self::TraceError,
        }
    }

    /// Whether the handler was invoked for this attempt.
    #[must_use]
    pub fn handler_ran(&self) -> bool {
        matches!(self, Self::Acked | Self::HandlerError | Self::Panicked)
    }

    /// Metric label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acked => "acked",
            Self::HandlerError => "handler_error",
            Self::Panicked => "panicked",
            Self::DecodeError => "decode_error",
            Self::TraceError => "trace_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_builder() {
        let attempt = DeliveryAttempt::new("m1", b"{}".to_vec())
            .with_attempt(3)
            .with_attribute(TRACEPARENT_ATTRIBUTE, "00-abc-def-01");

        assert_eq!(attempt.attempt, 3);
        assert_eq!(attempt.attribute("traceparent"), Some("00-abc-def-01"));
        assert_eq!(attempt.attribute("missing"), None);
    }

    #[test]
    fn test_span_request_fields() {
        let descriptor = SubscriptionDescriptor::test_stub("orders", "order-events");
        let attempt = DeliveryAttempt::new("m1", Vec::new()).with_attempt(2);

        let span = MessageSpan::for_attempt(&descriptor, &attempt);
        assert_eq!(span.kind, OperationKind::PubSubMessage);
        assert_eq!(span.service, "test");
        assert_eq!(span.topic, "orders");
        assert_eq!(span.subscription, "order-events");
        assert_eq!(span.message_id, "m1");
        assert_eq!(span.attempt, 2);
        assert_eq!(span.published, attempt.publish_time);
        assert!(span.traceparent.is_none());
    }

    #[test]
    fn test_context_carries_cancellation() {
        let token = CancellationToken::new();
        let descriptor = SubscriptionDescriptor::test_stub("orders", "order-events");
        let attempt = DeliveryAttempt::new("m7", Vec::new());
        let ctx = DeliveryContext::new(token.clone(), &descriptor, &attempt);

        assert_eq!(ctx.message_id(), "m7");
        assert_eq!(ctx.attempt(), 1);
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_outcome_labels() {
        let ok: Result<(), DispatchError> = Ok(());
        assert_eq!(DeliveryOutcome::from_result(&ok), DeliveryOutcome::Acked);

        let panicked = Err(DispatchError::Panicked("x".into()));
        assert_eq!(DeliveryOutcome::from_result(&panicked).as_str(), "panicked");
        assert!(DeliveryOutcome::Panicked.handler_ran());
        assert!(!DeliveryOutcome::DecodeError.handler_ran());
        assert!(!DeliveryOutcome::TraceError.handler_ran());
    }
}
