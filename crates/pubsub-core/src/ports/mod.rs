//! Ports layer: trait definitions at the edges of the dispatch core.

pub mod inbound;
pub mod outbound;

pub use inbound::MessageHandler;
pub use outbound::{
    Broker, BrokerSubscription, ConfigResolver, DeliveryCallback, DeliveryFuture, DispatchMetrics,
    EnvelopeCodec, NoOpMetrics, SpanHandle, Tracer,
};
