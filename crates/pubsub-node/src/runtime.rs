//! # Node Runtime
//!
//! ## Startup Sequence
//!
//! 1. Build the broker and the subscription registry
//! 2. Attach the propagating tracer and Prometheus metrics
//! 3. Register `orders/order-events` (fails fast on any config error)
//! 4. Publish orders; the broker retries and dead-letters as configured

use anyhow::{Context, Result};
use pubsub_core::adapters::{
    DeliveryReport, StaticConfigResolver, BINCODE_CONTENT_TYPE, CONTENT_TYPE_ATTRIBUTE,
    JSON_CONTENT_TYPE,
};
use pubsub_core::{
    ConfigError, DeliveryAttempt, InMemoryBroker, PublishReport, RetryPolicyConfig,
    Subscription, SubscriptionConfig, SubscriptionRegistry, Topic, TopicConfig,
};
use pubsub_telemetry::{inject_current, PrometheusDispatchMetrics, PropagatingTracer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

use crate::config::NodeConfig;
use crate::orders::{
    Fulfillment, FulfillmentHandler, OrderPlaced, ORDERS_TOPIC, ORDER_EVENTS_SUBSCRIPTION,
};

/// The running node: broker, registry and the order subscription.
pub struct NodeRuntime {
    config: NodeConfig,
    broker: Arc<InMemoryBroker>,
    registry: SubscriptionRegistry,
    fulfillment: Arc<Fulfillment>,
    orders: Option<Subscription<OrderPlaced>>,
    /// Message ids for deliveries that bypass the broker.
    local_sequence: AtomicU64,
}

impl NodeRuntime {
    /// Create the runtime. Nothing is registered until [`NodeRuntime::start`].
    pub fn new(config: NodeConfig, fulfillment: Arc<Fulfillment>) -> Result<Self> {
        let broker = Arc::new(InMemoryBroker::new());
        let metrics =
            PrometheusDispatchMetrics::new().context("failed to register dispatch metrics")?;

        let registry = SubscriptionRegistry::new(
            config.runtime.clone(),
            broker.clone(),
            Arc::new(StaticConfigResolver::new(config.deployment.clone())),
        )
        .with_tracer(Arc::new(PropagatingTracer::new()))
        .with_metrics(Arc::new(metrics));

        Ok(Self {
            config,
            broker,
            registry,
            fulfillment,
            orders: None,
            local_sequence: AtomicU64::new(0),
        })
    }

    /// Register the order subscription.
    pub fn start(&mut self) -> Result<(), ConfigError> {
        let topic = Topic::<OrderPlaced>::new(ORDERS_TOPIC, TopicConfig::default())?;
        let handler = FulfillmentHandler::new(Arc::clone(&self.fulfillment));

        let subscription = self.registry.register_subscription(
            &topic,
            ORDER_EVENTS_SUBSCRIPTION,
            SubscriptionConfig::new(handler).with_retry_policy(
                RetryPolicyConfig::new()
                    .max_retries(self.config.max_retries)
                    .min_backoff(chrono::Duration::seconds(1)),
            ),
        )?;

        info!(
            testing = self.registry.is_testing(),
            max_retries = subscription.retry_policy().max_retries(),
            "Node runtime started"
        );
        self.orders = Some(subscription);
        Ok(())
    }

    /// Publish one order as JSON and wait for its deliveries to settle.
    pub async fn publish(&self, order: &OrderPlaced) -> Result<PublishReport> {
        self.publish_encoded(order, JSON_CONTENT_TYPE).await
    }

    /// Publish one order as bincode.
    pub async fn publish_bincode(&self, order: &OrderPlaced) -> Result<PublishReport> {
        self.publish_encoded(order, BINCODE_CONTENT_TYPE).await
    }

    pub fn broker(&self) -> &InMemoryBroker {
        &self.broker
    }

    pub fn fulfillment(&self) -> &Fulfillment {
        &self.fulfillment
    }

    /// Stop accepting publishes and cancel in-flight deliveries.
    pub fn shutdown(&self) {
        info!(
            published = self.broker.messages_published(),
            delivery_attempts = self.broker.delivery_attempts(),
            acked = self.broker.messages_acked(),
            dead_letters = self.broker.dead_letters().len(),
            "Shutting down node runtime"
        );
        self.broker.shutdown();
    }

    async fn publish_encoded(&self, order: &OrderPlaced, content_type: &str) -> Result<PublishReport> {
        let span = info_span!("publish", topic = ORDERS_TOPIC, order_id = order.order_id);
        async {
            let payload = if content_type == BINCODE_CONTENT_TYPE {
                bincode_payload(order)?
            } else {
                serde_json::to_vec(order).context("failed to encode order")?
            };

            let mut attributes =
                HashMap::from([(CONTENT_TYPE_ATTRIBUTE.to_string(), content_type.to_string())]);
            inject_current(&mut attributes);

            if self.registry.is_testing() {
                return self.deliver_directly(attributes, payload).await;
            }

            let report = self
                .broker
                .publish(ORDERS_TOPIC, attributes, payload)
                .await
                .context("broker rejected publish")?;
            log_report(order, &report);
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Test mode registers nothing with the broker, so run one attempt
    /// through the subscription itself.
    async fn deliver_directly(
        &self,
        attributes: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<PublishReport> {
        let subscription = self
            .orders
            .as_ref()
            .context("node runtime has not been started")?;

        let message_id = format!(
            "local-{}",
            self.local_sequence.fetch_add(1, Ordering::Relaxed) + 1
        );
        let mut attempt = DeliveryAttempt::new(message_id.clone(), payload);
        attempt.attributes = attributes;

        let result = subscription.deliver(attempt).await;
        Ok(PublishReport {
            message_id,
            deliveries: vec![DeliveryReport {
                subscription: subscription.name().to_string(),
                attempts: 1,
                acked: result.is_ok(),
                last_error: result.err().map(|e| e.to_string()),
            }],
        })
    }
}

fn bincode_payload(order: &OrderPlaced) -> Result<Vec<u8>> {
    bincode::serialize(order).context("failed to encode order")
}

fn log_report(order: &OrderPlaced, report: &PublishReport) {
    for delivery in &report.deliveries {
        if delivery.acked {
            info!(
                order_id = order.order_id,
                msg_id = %report.message_id,
                subscription = %delivery.subscription,
                attempts = delivery.attempts,
                "Order delivered"
            );
        } else {
            warn!(
                order_id = order.order_id,
                msg_id = %report.message_id,
                subscription = %delivery.subscription,
                attempts = delivery.attempts,
                error = delivery.last_error.as_deref().unwrap_or_default(),
                "Order not delivered"
            );
        }
    }
}
