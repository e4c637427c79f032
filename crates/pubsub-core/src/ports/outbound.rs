//! Outbound Ports (Driven Ports)
//!
//! Collaborators the dispatch core depends on but does not implement itself:
//! the broker transport, the tracer, the deploy-time config source, the
//! envelope codec and the metrics sink.

use crate::domain::{
    DeliveryAttempt, DeliveryOutcome, MessageSpan, RetryPolicy, SpanOutcome, SubscriptionDescriptor,
};
use crate::error::{BrokerError, DecodeError, DispatchError, TraceError};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Future returned by a delivery callback.
pub type DeliveryFuture = BoxFuture<'static, Result<(), DispatchError>>;

/// Callback the broker invokes once per delivery attempt.
///
/// `Ok(())` acknowledges the message; `Err` asks for redelivery under the
/// subscription's [`RetryPolicy`].
pub type DeliveryCallback =
    Arc<dyn Fn(CancellationToken, DeliveryAttempt) -> DeliveryFuture + Send + Sync>;

/// A subscription as handed to the broker.
#[derive(Clone)]
pub struct BrokerSubscription {
    pub descriptor: SubscriptionDescriptor,
    pub retry_policy: RetryPolicy,
    pub callback: DeliveryCallback,
}

impl std::fmt::Debug for BrokerSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerSubscription")
            .field("descriptor", &self.descriptor)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

/// Message transport.
///
/// The broker owns persistence, redelivery scheduling and acknowledgement.
/// It must not redeliver an attempt that is still in flight.
pub trait Broker: Send + Sync {
    /// Start delivering messages for a subscription.
    fn subscribe(&self, subscription: BrokerSubscription) -> Result<(), BrokerError>;
}

/// Tracing backend for delivery spans.
pub trait Tracer: Send + Sync {
    /// Whether the caller is already inside a delivery trace, in which case
    /// the pipeline does not open another span.
    fn in_active_trace(&self) -> bool {
        false
    }

    /// Open the span for one delivery attempt.
    fn begin_span(&self, request: &MessageSpan) -> Result<SpanHandle, TraceError>;

    /// Close a span. Called exactly once per handle.
    fn finish_span(&self, handle: SpanHandle, outcome: SpanOutcome<'_>);
}

/// An open delivery span.
#[derive(Debug)]
pub struct SpanHandle {
    id: u64,
    span: tracing::Span,
}

impl SpanHandle {
    pub fn new(id: u64, span: tracing::Span) -> Self {
        Self { id, span }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The `tracing` span the handler runs inside.
    #[must_use]
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }
}

/// Source of deploy-time subscription descriptors.
pub trait ConfigResolver: Send + Sync {
    /// Look up a subscription; `None` when the deployment does not know it.
    fn resolve(&self, topic: &str, subscription: &str) -> Option<SubscriptionDescriptor>;
}

/// Turns transport attributes and payload into a typed message.
pub trait EnvelopeCodec<T>: Send + Sync {
    fn decode(&self, attributes: &HashMap<String, String>, payload: &[u8]) -> Result<T, DecodeError>;
}

/// Sink for per-delivery metrics.
pub trait DispatchMetrics: Send + Sync {
    fn record_outcome(
        &self,
        descriptor: &SubscriptionDescriptor,
        outcome: DeliveryOutcome,
        elapsed: Duration,
    );
}

/// Metrics sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetrics;

impl DispatchMetrics for NoOpMetrics {
    fn record_outcome(&self, _: &SubscriptionDescriptor, _: DeliveryOutcome, _: Duration) {}
}
