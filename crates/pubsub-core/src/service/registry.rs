//! # Subscription Registry
//!
//! Built once during bootstrap and passed by reference to whatever declares
//! subscriptions. Registration is where every deploy-time contract is
//! checked, so a misconfigured binary fails before it serves traffic:
//!
//! 1. Subscription name is valid.
//! 2. Retry policy resolves (defaults filled, no negative backoff).
//! 3. The (topic, subscription) pair is not already registered here.
//! 4. The deployment config knows the pair (skipped in test mode).
//! 5. The broker accepts the delivery callback (skipped in test mode).

use crate::adapters::{
    ContentTypeCodec, DeploymentConfig, InMemoryBroker, StaticConfigResolver, TracingTracer,
};
use crate::config::RuntimeSettings;
use crate::domain::{validate_name, SubscriptionDescriptor, Topic};
use crate::error::ConfigError;
use crate::ports::{
    Broker, BrokerSubscription, ConfigResolver, DispatchMetrics, EnvelopeCodec, NoOpMetrics,
    Tracer,
};
use crate::service::dispatcher::Dispatcher;
use crate::service::subscription::{Subscription, SubscriptionConfig};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

/// Registers subscriptions with a broker.
pub struct SubscriptionRegistry {
    settings: RuntimeSettings,
    broker: Arc<dyn Broker>,
    resolver: Arc<dyn ConfigResolver>,
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn DispatchMetrics>,
    /// (topic, subscription) pairs registered so far.
    registered: Mutex<HashSet<(String, String)>>,
}

impl SubscriptionRegistry {
    pub fn new(
        settings: RuntimeSettings,
        broker: Arc<dyn Broker>,
        resolver: Arc<dyn ConfigResolver>,
    ) -> Self {
        Self {
            settings,
            broker,
            resolver,
            tracer: Arc::new(TracingTracer::new()),
            metrics: Arc::new(NoOpMetrics),
            registered: Mutex::new(HashSet::new()),
        }
    }

    /// A registry in test mode. Subscriptions are only reachable through
    /// [`Subscription::deliver`].
    pub fn for_testing() -> Self {
        Self::new(
            RuntimeSettings::testing(),
            Arc::new(InMemoryBroker::new()),
            Arc::new(StaticConfigResolver::default()),
        )
    }

    /// Build a registry from [`RuntimeSettings`], loading the deployment
    /// config unless in test mode.
    pub fn from_settings(
        settings: RuntimeSettings,
        broker: Arc<dyn Broker>,
    ) -> Result<Self, ConfigError> {
        let config = if settings.testing {
            DeploymentConfig::default()
        } else {
            let path = settings.deploy_config_path.as_ref().ok_or_else(|| {
                ConfigError::Load("PUBSUB_DEPLOY_CONFIG is not set".to_string())
            })?;
            DeploymentConfig::from_file(path)?
        };

        Ok(Self::new(
            settings,
            broker,
            Arc::new(StaticConfigResolver::new(config)),
        ))
    }

    /// Use `tracer` for delivery spans instead of [`TracingTracer`].
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Record delivery outcomes to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn DispatchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn is_testing(&self) -> bool {
        self.settings.testing
    }

    /// Number of subscriptions registered through this registry.
    pub fn len(&self) -> usize {
        self.registered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a handler for `topic` under `name`.
    ///
    /// Call once per subscription during bootstrap. Any error is a
    /// deploy-time contract violation and should stop the process.
    pub fn register_subscription<T>(
        &self,
        topic: &Topic<T>,
        name: &str,
        config: SubscriptionConfig<T>,
    ) -> Result<Subscription<T>, ConfigError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        validate_name(name).map_err(|violation| ConfigError::InvalidSubscriptionName {
            name: name.to_string(),
            violation,
        })?;

        let retry_policy = config.retry_policy.unwrap_or_default().resolve()?;

        // Held to the end so concurrent registrations of one pair cannot both pass.
        let mut registered = self.registered.lock();
        let key = (topic.name().to_string(), name.to_string());
        if registered.contains(&key) {
            return Err(ConfigError::DuplicateSubscription {
                topic: key.0,
                subscription: key.1,
            });
        }

        let descriptor = self.resolve(topic.name(), name)?;

        let codec: Arc<dyn EnvelopeCodec<T>> = match config.codec {
            Some(codec) => codec,
            None => Arc::new(ContentTypeCodec),
        };
        let dispatcher = Arc::new(Dispatcher::new(
            descriptor.clone(),
            config.handler,
            codec,
            Arc::clone(&self.tracer),
            Arc::clone(&self.metrics),
        ));

        if !self.settings.testing {
            self.broker
                .subscribe(BrokerSubscription {
                    descriptor: descriptor.clone(),
                    retry_policy,
                    callback: Arc::clone(&dispatcher).into_callback(),
                })
                .map_err(|e| ConfigError::Broker(e.to_string()))?;

            info!(
                service = %descriptor.service_name,
                topic = %descriptor.topic,
                subscription = %descriptor.subscription,
                max_retries = retry_policy.max_retries(),
                "registered subscription"
            );
        }

        registered.insert(key);
        Ok(Subscription::new(
            name.to_string(),
            topic.clone(),
            retry_policy,
            dispatcher,
        ))
    }

    fn resolve(&self, topic: &str, subscription: &str) -> Result<SubscriptionDescriptor, ConfigError> {
        if self.settings.testing {
            return Ok(SubscriptionDescriptor::test_stub(topic, subscription));
        }

        self.resolver.resolve(topic, subscription).ok_or_else(|| {
            error!(
                topic = %topic,
                subscription = %subscription,
                "unregistered/unknown subscription"
            );
            ConfigError::UnknownSubscription {
                topic: topic.to_string(),
                subscription: subscription.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeliveryAttempt, DeliveryContext, RetryPolicyConfig, TopicConfig};
    use crate::error::HandlerError;

    async fn ack(_ctx: DeliveryContext, _id: u64) -> Result<(), HandlerError> {
        Ok(())
    }

    fn orders() -> Topic<u64> {
        Topic::new("orders", TopicConfig::default()).unwrap()
    }

    fn deployed(broker: Arc<InMemoryBroker>) -> SubscriptionRegistry {
        let config = DeploymentConfig::default().with_subscription("orders", "order-events", "fulfillment");
        SubscriptionRegistry::new(
            RuntimeSettings::default(),
            broker,
            Arc::new(StaticConfigResolver::new(config)),
        )
    }

    #[test]
    fn test_invalid_name_rejected() {
        let registry = SubscriptionRegistry::for_testing();
        let err = registry
            .register_subscription(&orders(), "My_Sub", SubscriptionConfig::new(ack))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSubscriptionName { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_negative_backoff_rejected() {
        let registry = SubscriptionRegistry::for_testing();
        let config = SubscriptionConfig::new(ack)
            .with_retry_policy(RetryPolicyConfig::new().min_backoff(chrono::Duration::seconds(-1)));
        let err = registry
            .register_subscription(&orders(), "order-events", config)
            .unwrap_err();
        assert_eq!(err, ConfigError::NegativeBackoff { field: "MinBackoff" });
    }

    #[test]
    fn test_testing_mode_uses_stub() {
        let registry = SubscriptionRegistry::for_testing();
        let sub = registry
            .register_subscription(&orders(), "order-events", SubscriptionConfig::new(ack))
            .unwrap();

        assert_eq!(sub.descriptor().service_name, "test");
        assert_eq!(sub.retry_policy().max_retries(), 100);
        assert_eq!(sub.topic().name(), "orders");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_testing_mode_skips_broker() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = SubscriptionRegistry::new(
            RuntimeSettings::testing(),
            broker.clone(),
            Arc::new(StaticConfigResolver::default()),
        );
        registry
            .register_subscription(&orders(), "order-events", SubscriptionConfig::new(ack))
            .unwrap();
        assert_eq!(broker.subscription_count("orders"), 0);
    }

    #[test]
    fn test_duplicate_rejected() {
        let registry = SubscriptionRegistry::for_testing();
        registry
            .register_subscription(&orders(), "order-events", SubscriptionConfig::new(ack))
            .unwrap();
        let err = registry
            .register_subscription(&orders(), "order-events", SubscriptionConfig::new(ack))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSubscription { .. }));
    }

    #[test]
    fn test_deployed_registers_with_broker() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = deployed(broker.clone());
        let sub = registry
            .register_subscription(&orders(), "order-events", SubscriptionConfig::new(ack))
            .unwrap();

        assert_eq!(sub.descriptor().service_name, "fulfillment");
        assert_eq!(broker.subscription_count("orders"), 1);
    }

    #[test]
    fn test_unknown_subscription_is_fatal() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = deployed(broker.clone());
        let err = registry
            .register_subscription(&orders(), "audit", SubscriptionConfig::new(ack))
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "unregistered/unknown subscription on topic orders: audit"
        );
        assert_eq!(broker.subscription_count("orders"), 0);
    }

    #[test]
    fn test_from_settings_requires_config_path() {
        let err = SubscriptionRegistry::from_settings(
            RuntimeSettings::default(),
            Arc::new(InMemoryBroker::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[tokio::test]
    async fn test_deliver_in_testing_mode() {
        let registry = SubscriptionRegistry::for_testing();
        let sub = registry
            .register_subscription(&orders(), "order-events", SubscriptionConfig::new(ack))
            .unwrap();
        sub.deliver(DeliveryAttempt::new("m1", b"5".to_vec()))
            .await
            .unwrap();
    }
}
