//! Adapters layer: concrete implementations of the outbound ports.

pub mod codec;
pub mod config_resolver;
pub mod in_memory;
pub mod recording_tracer;
pub mod tracing_tracer;

pub use codec::{
    BincodeCodec, ContentTypeCodec, JsonCodec, BINCODE_CONTENT_TYPE, CONTENT_TYPE_ATTRIBUTE,
    JSON_CONTENT_TYPE,
};
pub use config_resolver::{
    DeploymentConfig, StaticConfigResolver, SubscriptionDeployment, TopicDeployment,
};
pub use in_memory::{DeadLetter, DeliveryReport, InMemoryBroker, PublishReport};
pub use recording_tracer::{RecordedOutcome, RecordedSpan, RecordingTracer};
pub use tracing_tracer::{TracingTracer, MESSAGE_SPAN_NAME};
