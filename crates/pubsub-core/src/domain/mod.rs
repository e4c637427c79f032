//! Domain layer: pure values and validation, no I/O.

pub mod delivery;
pub mod names;
pub mod retry;
pub mod topic;

pub use delivery::{
    DeliveryAttempt, DeliveryContext, DeliveryOutcome, MessageSpan, OperationKind, SpanOutcome,
    TRACEPARENT_ATTRIBUTE,
};
pub use names::{validate_name, MAX_NAME_LEN};
pub use retry::{
    RetryPolicy, RetryPolicyConfig, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES, DEFAULT_MIN_BACKOFF,
};
pub use topic::{
    DeliveryGuarantee, SubscriptionDescriptor, Topic, TopicConfig, TEST_SERVICE_NAME,
};
