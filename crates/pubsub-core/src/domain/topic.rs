//! Topic handles and deploy-time subscription descriptors.

use crate::domain::names::validate_name;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Service name given to every subscription resolved in test mode.
pub const TEST_SERVICE_NAME: &str = "test";

/// Delivery guarantee a topic is declared with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeliveryGuarantee {
    /// Every message is delivered one or more times.
    #[default]
    AtLeastOnce,
    /// The broker deduplicates redeliveries within its own window.
    ExactlyOnce,
}

/// Topic declaration options.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicConfig {
    pub delivery_guarantee: DeliveryGuarantee,
}

/// A named, typed channel carrying messages of type `T`.
///
/// Created once during bootstrap and never mutated. Renaming a deployed topic
/// loses any messages still in flight under the old name.
pub struct Topic<T> {
    inner: Arc<TopicInner>,
    _message: PhantomData<fn() -> T>,
}

#[derive(Debug)]
struct TopicInner {
    name: String,
    delivery_guarantee: DeliveryGuarantee,
}

impl<T> Topic<T> {
    /// Declare a topic, validating its name.
    pub fn new(name: impl Into<String>, config: TopicConfig) -> Result<Self, ConfigError> {
        let name = name.into();
        validate_name(&name).map_err(|violation| ConfigError::InvalidTopicName {
            name: name.clone(),
            violation,
        })?;

        Ok(Self {
            inner: Arc::new(TopicInner {
                name,
                delivery_guarantee: config.delivery_guarantee,
            }),
            _message: PhantomData,
        })
    }

    /// The topic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The declared delivery guarantee.
    #[must_use]
    pub fn delivery_guarantee(&self) -> DeliveryGuarantee {
        self.inner.delivery_guarantee
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _message: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.inner.name)
            .field("delivery_guarantee", &self.inner.delivery_guarantee)
            .finish()
    }
}

/// Deploy-time identity of one subscription, produced by a config resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionDescriptor {
    /// Logical topic name.
    pub topic: String,
    /// Logical subscription name.
    pub subscription: String,
    /// Service that owns the subscription.
    pub service_name: String,
    /// Name of the subscription at the cloud provider, when it differs.
    pub provider_name: Option<String>,
    /// Index of the subscription's endpoint in the trace metadata.
    pub trace_idx: u32,
}

impl SubscriptionDescriptor {
    /// Stub descriptor used in test mode, where nothing is deployed.
    #[must_use]
    pub fn test_stub(topic: &str, subscription: &str) -> Self {
        Self {
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            service_name: TEST_SERVICE_NAME.to_string(),
            provider_name: None,
            trace_idx: 0,
        }
    }
}
