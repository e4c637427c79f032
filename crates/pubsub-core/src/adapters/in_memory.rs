//! # In-Memory Broker
//!
//! Single-process [`Broker`] for development and tests. Distributed
//! deployments use a real transport; this one exists so a service can run
//! end to end without one.
//!
//! Behavior:
//! - `publish` fans a message out to every subscription of its topic, each on
//!   its own tokio task.
//! - A failed attempt is redelivered immediately while the subscription's
//!   [`RetryPolicy::should_redeliver`](crate::domain::RetryPolicy::should_redeliver)
//!   allows it. No backoff delay is applied.
//! - Messages that exhaust their retries are dead-lettered.

use crate::domain::DeliveryAttempt;
use crate::error::{BrokerError, DispatchError};
use crate::ports::{Broker, BrokerSubscription};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// A message that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub topic: String,
    pub subscription: String,
    pub message_id: String,
    pub attempts: u32,
    pub last_error: String,
}

/// Delivery result for one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub subscription: String,
    pub attempts: u32,
    pub acked: bool,
    pub last_error: Option<String>,
}

/// Result of publishing one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub message_id: String,
    pub deliveries: Vec<DeliveryReport>,
}

impl PublishReport {
    /// Whether every subscription acknowledged the message.
    #[must_use]
    pub fn all_acked(&self) -> bool {
        self.deliveries.iter().all(|d| d.acked)
    }
}

/// In-process message broker.
pub struct InMemoryBroker {
    /// Subscriptions by topic name.
    subscriptions: RwLock<HashMap<String, Vec<Arc<BrokerSubscription>>>>,

    /// Messages that ran out of retries.
    dead_letters: Mutex<Vec<DeadLetter>>,

    /// Parent of every delivery's cancellation token.
    shutdown: CancellationToken,

    messages_published: AtomicU64,
    delivery_attempts: AtomicU64,
    messages_acked: AtomicU64,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            dead_letters: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            messages_published: AtomicU64::new(0),
            delivery_attempts: AtomicU64::new(0),
            messages_acked: AtomicU64::new(0),
        }
    }

    /// Publish a message to every subscription of `topic` and wait until each
    /// has either acknowledged it or been dead-lettered.
    pub async fn publish(
        &self,
        topic: &str,
        attributes: HashMap<String, String>,
        payload: Vec<u8>,
    ) -> Result<PublishReport, BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }

        let message_id = Uuid::new_v4().to_string();
        let publish_time = Utc::now();
        let targets = self.subscriptions_for(topic);

        self.messages_published.fetch_add(1, Ordering::Relaxed);
        debug!(
            topic = %topic,
            msg_id = %message_id,
            subscriptions = targets.len(),
            "Message published"
        );

        let mut handles = Vec::with_capacity(targets.len());
        for sub in targets {
            let attempt = DeliveryAttempt {
                message_id: message_id.clone(),
                publish_time,
                attempt: 1,
                attributes: attributes.clone(),
                payload: payload.clone(),
            };
            let token = self.shutdown.child_token();
            handles.push((
                sub.descriptor.subscription.clone(),
                tokio::spawn(deliver_until_settled(sub, token, attempt)),
            ));
        }

        let mut deliveries = Vec::with_capacity(handles.len());
        for (subscription, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => SettledDelivery {
                    attempts: 1,
                    result: Err(format!("delivery task failed: {join_err}")),
                },
            };
            deliveries.push(self.settle(topic, &subscription, &message_id, outcome));
        }

        Ok(PublishReport {
            message_id,
            deliveries,
        })
    }

    /// Run exactly one delivery attempt against one subscription, without
    /// redelivery.
    pub async fn deliver(
        &self,
        topic: &str,
        subscription: &str,
        attempt: DeliveryAttempt,
    ) -> Result<Result<(), DispatchError>, BrokerError> {
        let sub = self
            .subscriptions_for(topic)
            .into_iter()
            .find(|s| s.descriptor.subscription == subscription)
            .ok_or_else(|| BrokerError::UnknownSubscription {
                topic: topic.to_string(),
                subscription: subscription.to_string(),
            })?;

        self.delivery_attempts.fetch_add(1, Ordering::Relaxed);
        let result = (sub.callback)(self.shutdown.child_token(), attempt).await;
        if result.is_ok() {
            self.messages_acked.fetch_add(1, Ordering::Relaxed);
        }
        Ok(result)
    }

    /// Cancel in-flight deliveries and refuse new publishes.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Number of subscriptions on a topic.
    #[must_use]
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.subscriptions.read().get(topic).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().clone()
    }

    #[must_use]
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn delivery_attempts(&self) -> u64 {
        self.delivery_attempts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_acked(&self) -> u64 {
        self.messages_acked.load(Ordering::Relaxed)
    }

    fn subscriptions_for(&self, topic: &str) -> Vec<Arc<BrokerSubscription>> {
        self.subscriptions
            .read()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    fn settle(
        &self,
        topic: &str,
        subscription: &str,
        message_id: &str,
        outcome: SettledDelivery,
    ) -> DeliveryReport {
        self.delivery_attempts
            .fetch_add(u64::from(outcome.attempts), Ordering::Relaxed);

        match outcome.result {
            Ok(()) => {
                self.messages_acked.fetch_add(1, Ordering::Relaxed);
                DeliveryReport {
                    subscription: subscription.to_string(),
                    attempts: outcome.attempts,
                    acked: true,
                    last_error: None,
                }
            }
            Err(last_error) => {
                warn!(
                    topic = %topic,
                    subscription = %subscription,
                    msg_id = %message_id,
                    attempts = outcome.attempts,
                    error = %last_error,
                    "Message dead-lettered after exhausting retries"
                );
                self.dead_letters.lock().push(DeadLetter {
                    topic: topic.to_string(),
                    subscription: subscription.to_string(),
                    message_id: message_id.to_string(),
                    attempts: outcome.attempts,
                    last_error: last_error.clone(),
                });
                DeliveryReport {
                    subscription: subscription.to_string(),
                    attempts: outcome.attempts,
                    acked: false,
                    last_error: Some(last_error),
                }
            }
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for InMemoryBroker {
    fn subscribe(&self, subscription: BrokerSubscription) -> Result<(), BrokerError> {
        if self.shutdown.is_cancelled() {
            return Err(BrokerError::Closed);
        }

        let mut subs = self.subscriptions.write();
        let topic_subs = subs
            .entry(subscription.descriptor.topic.clone())
            .or_default();

        if topic_subs
            .iter()
            .any(|s| s.descriptor.subscription == subscription.descriptor.subscription)
        {
            return Err(BrokerError::AlreadySubscribed {
                topic: subscription.descriptor.topic.clone(),
                subscription: subscription.descriptor.subscription.clone(),
            });
        }

        debug!(
            topic = %subscription.descriptor.topic,
            subscription = %subscription.descriptor.subscription,
            "Subscription attached"
        );
        topic_subs.push(Arc::new(subscription));
        Ok(())
    }
}

struct SettledDelivery {
    attempts: u32,
    result: Result<(), String>,
}

async fn deliver_until_settled(
    sub: Arc<BrokerSubscription>,
    token: CancellationToken,
    mut attempt: DeliveryAttempt,
) -> SettledDelivery {
    loop {
        let number = attempt.attempt;
        match (sub.callback)(token.clone(), attempt.clone()).await {
            Ok(()) => {
                return SettledDelivery {
                    attempts: number,
                    result: Ok(()),
                }
            }
            Err(err) => {
                if !sub.retry_policy.should_redeliver(number) || token.is_cancelled() {
                    return SettledDelivery {
                        attempts: number,
                        result: Err(err.to_string()),
                    };
                }
                debug!(
                    subscription = %sub.descriptor.subscription,
                    msg_id = %attempt.message_id,
                    delivery_attempt = number,
                    error = %err,
                    "Redelivering message"
                );
                attempt.attempt = number.saturating_add(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RetryPolicyConfig, SubscriptionDescriptor};
    use crate::ports::{DeliveryCallback, DeliveryFuture};
    use std::sync::atomic::AtomicU32;

    fn subscription(
        name: &str,
        max_retries: u32,
        callback: DeliveryCallback,
    ) -> BrokerSubscription {
        BrokerSubscription {
            descriptor: SubscriptionDescriptor::test_stub("orders", name),
            retry_policy: RetryPolicyConfig::new()
                .max_retries(max_retries)
                .resolve()
                .unwrap(),
            callback,
        }
    }

    fn failing_until(success_on: u32, calls: Arc<AtomicU32>) -> DeliveryCallback {
        Arc::new(move |_token: CancellationToken, attempt: DeliveryAttempt| -> DeliveryFuture {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if attempt.attempt >= success_on {
                    Ok(())
                } else {
                    Err(DispatchError::Handler(anyhow::anyhow!("not yet")))
                }
            })
        })
    }

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let broker = InMemoryBroker::new();
        let report = broker.publish("orders", HashMap::new(), b"{}".to_vec()).await.unwrap();

        assert!(report.deliveries.is_empty());
        assert_eq!(broker.messages_published(), 1);
    }

    #[tokio::test]
    async fn test_redelivers_until_ack() {
        let broker = InMemoryBroker::new();
        let calls = Arc::new(AtomicU32::new(0));
        broker
            .subscribe(subscription("order-events", 5, failing_until(3, calls.clone())))
            .unwrap();

        let report = broker.publish("orders", HashMap::new(), Vec::new()).await.unwrap();

        assert!(report.all_acked());
        assert_eq!(report.deliveries[0].attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(broker.delivery_attempts(), 3);
        assert!(broker.dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_dead_letters_after_max_retries() {
        let broker = InMemoryBroker::new();
        let calls = Arc::new(AtomicU32::new(0));
        broker
            .subscribe(subscription("order-events", 2, failing_until(u32::MAX, calls.clone())))
            .unwrap();

        let report = broker.publish("orders", HashMap::new(), Vec::new()).await.unwrap();

        assert!(!report.all_acked());
        // First attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let dead = broker.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].last_error, "not yet");
    }

    #[tokio::test]
    async fn test_attempt_counter_stops_at_u32_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let sub = Arc::new(subscription(
            "order-events",
            u32::MAX,
            failing_until(u32::MAX, calls.clone()),
        ));
        let first = DeliveryAttempt::new("m1", Vec::new()).with_attempt(u32::MAX - 2);

        let settled = deliver_until_settled(sub, CancellationToken::new(), first).await;

        // u32::MAX - 2 fails, u32::MAX - 1 fails, u32::MAX acks.
        assert_eq!(settled.attempts, u32::MAX);
        assert!(settled.result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_final_attempt_number_is_not_redelivered() {
        let calls = Arc::new(AtomicU32::new(0));
        let never_acks: DeliveryCallback = {
            let calls = calls.clone();
            Arc::new(move |_token: CancellationToken, _attempt: DeliveryAttempt| -> DeliveryFuture {
                calls.fetch_add(1, Ordering::SeqCst);
                Box::pin(async {
                    Err::<(), _>(DispatchError::Handler(anyhow::anyhow!("still failing")))
                })
            })
        };
        let sub = Arc::new(subscription("order-events", u32::MAX, never_acks));
        let first = DeliveryAttempt::new("m1", Vec::new()).with_attempt(u32::MAX - 1);

        let settled = deliver_until_settled(sub, CancellationToken::new(), first).await;

        assert_eq!(settled.attempts, u32::MAX);
        assert_eq!(settled.result, Err("still failing".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_rejected() {
        let broker = InMemoryBroker::new();
        let calls = Arc::new(AtomicU32::new(0));
        broker
            .subscribe(subscription("order-events", 0, failing_until(1, calls.clone())))
            .unwrap();

        let err = broker
            .subscribe(subscription("order-events", 0, failing_until(1, calls)))
            .unwrap_err();
        assert!(matches!(err, BrokerError::AlreadySubscribed { .. }));
        assert_eq!(broker.subscription_count("orders"), 1);
    }

    #[tokio::test]
    async fn test_deliver_unknown_subscription() {
        let broker = InMemoryBroker::new();
        let err = broker
            .deliver("orders", "missing", DeliveryAttempt::new("m1", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownSubscription { .. }));
    }

    #[tokio::test]
    async fn test_publish_after_shutdown() {
        let broker = InMemoryBroker::new();
        broker.shutdown();
        let err = broker.publish("orders", HashMap::new(), Vec::new()).await.unwrap_err();
        assert_eq!(err, BrokerError::Closed);
    }
}
