//! Subscription handles.

use crate::domain::{DeliveryAttempt, RetryPolicy, RetryPolicyConfig, SubscriptionDescriptor, Topic};
use crate::error::DispatchError;
use crate::ports::{EnvelopeCodec, MessageHandler};
use crate::service::dispatcher::Dispatcher;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What to register: a handler, plus optional retry policy and codec.
pub struct SubscriptionConfig<T> {
    pub(crate) handler: Arc<dyn MessageHandler<T>>,
    pub(crate) retry_policy: Option<RetryPolicyConfig>,
    pub(crate) codec: Option<Arc<dyn EnvelopeCodec<T>>>,
}

impl<T> SubscriptionConfig<T>
where
    T: Send + 'static,
{
    pub fn new<H>(handler: H) -> Self
    where
        H: MessageHandler<T> + 'static,
    {
        Self {
            handler: Arc::new(handler),
            retry_policy: None,
            codec: None,
        }
    }

    /// Override the retry policy. Unset fields keep their defaults.
    pub fn with_retry_policy(mut self, policy: RetryPolicyConfig) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Decode payloads with `codec` instead of the content-type codec.
    pub fn with_codec<C>(mut self, codec: C) -> Self
    where
        C: EnvelopeCodec<T> + 'static,
    {
        self.codec = Some(Arc::new(codec));
        self
    }
}

/// A registered subscription.
///
/// Immutable after registration. Holds a handle to its topic for lookup; the
/// topic does not own it.
pub struct Subscription<T> {
    name: String,
    topic: Topic<T>,
    retry_policy: RetryPolicy,
    dispatcher: Arc<Dispatcher<T>>,
}

impl<T> Subscription<T>
where
    T: Send + 'static,
{
    pub(crate) fn new(
        name: String,
        topic: Topic<T>,
        retry_policy: RetryPolicy,
        dispatcher: Arc<Dispatcher<T>>,
    ) -> Self {
        Self {
            name,
            topic,
            retry_policy,
            dispatcher,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &Topic<T> {
        &self.topic
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Deploy-time identity, or the test stub in test mode.
    pub fn descriptor(&self) -> &SubscriptionDescriptor {
        self.dispatcher.descriptor()
    }

    /// Run one delivery attempt through the pipeline, bypassing the broker.
    pub async fn deliver(&self, attempt: DeliveryAttempt) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch(CancellationToken::new(), attempt)
            .await
    }

    /// Like [`Subscription::deliver`], with a caller-owned cancellation token.
    pub async fn deliver_with_cancel(
        &self,
        cancel: CancellationToken,
        attempt: DeliveryAttempt,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(cancel, attempt).await
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("topic", &self.topic.name())
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}
