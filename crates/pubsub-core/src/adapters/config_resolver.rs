//! Deployment config resolution.
//!
//! A subscription resolves only when the deployment lists it under its topic.
//! Anything else means the running binary and the deployed infrastructure
//! disagree.
//!
//! ```json
//! {
//!   "topics": {
//!     "orders": {
//!       "subscriptions": {
//!         "order-events": { "service": "fulfillment", "trace_idx": 3 }
//!       }
//!     }
//!   }
//! }
//! ```

use crate::domain::SubscriptionDescriptor;
use crate::error::ConfigError;
use crate::ports::ConfigResolver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Deploy-time pub/sub configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub topics: HashMap<String, TopicDeployment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicDeployment {
    #[serde(default)]
    pub subscriptions: HashMap<String, SubscriptionDeployment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDeployment {
    /// Service that owns the subscription.
    pub service: String,
    #[serde(default)]
    pub provider_name: Option<String>,
    #[serde(default)]
    pub trace_idx: u32,
}

impl DeploymentConfig {
    /// Parse a JSON deployment config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))
    }

    /// Read and parse a JSON deployment config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Add a subscription entry.
    pub fn with_subscription(
        mut self,
        topic: impl Into<String>,
        subscription: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        self.topics
            .entry(topic.into())
            .or_default()
            .subscriptions
            .insert(
                subscription.into(),
                SubscriptionDeployment {
                    service: service.into(),
                    provider_name: None,
                    trace_idx: 0,
                },
            );
        self
    }
}

/// Resolves subscriptions from a [`DeploymentConfig`].
#[derive(Debug, Clone, Default)]
pub struct StaticConfigResolver {
    config: DeploymentConfig,
}

impl StaticConfigResolver {
    pub fn new(config: DeploymentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }
}

impl ConfigResolver for StaticConfigResolver {
    fn resolve(&self, topic: &str, subscription: &str) -> Option<SubscriptionDescriptor> {
        let deployed = self.config.topics.get(topic)?.subscriptions.get(subscription)?;

        Some(SubscriptionDescriptor {
            topic: topic.to_string(),
            subscription: subscription.to_string(),
            service_name: deployed.service.clone(),
            provider_name: deployed.provider_name.clone(),
            trace_idx: deployed.trace_idx,
        })
    }
}
