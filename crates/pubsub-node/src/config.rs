//! # Node Configuration
//!
//! Outside test mode the deployment config comes from `PUBSUB_DEPLOY_CONFIG`.
//! Without that variable the node deploys only its own order subscription.

use pubsub_core::{ConfigError, DeploymentConfig, RuntimeSettings};
use pubsub_telemetry::TelemetryConfig;
use std::env;

use crate::orders::{ORDERS_TOPIC, ORDER_EVENTS_SUBSCRIPTION};

/// Service name the built-in deployment assigns to the order subscription.
pub const SERVICE_NAME: &str = "pubsub-node";

/// Complete node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Test mode and deployment config location.
    pub runtime: RuntimeSettings,
    /// Logging, tracing and metrics.
    pub telemetry: TelemetryConfig,
    /// Which subscriptions this deployment knows.
    pub deployment: DeploymentConfig,
    /// Redeliveries allowed for the order subscription.
    pub max_retries: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSettings::default(),
            telemetry: TelemetryConfig::default(),
            deployment: Self::builtin_deployment(),
            max_retries: 2,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    ///
    /// - `PUBSUB_NODE_MAX_RETRIES`: Redeliveries per order (default: 2)
    /// - plus everything [`RuntimeSettings::from_env`] and
    ///   [`TelemetryConfig::from_env`] read
    pub fn from_env() -> Result<Self, ConfigError> {
        let runtime = RuntimeSettings::from_env();
        let deployment = match &runtime.deploy_config_path {
            Some(path) => DeploymentConfig::from_file(path)?,
            None => Self::builtin_deployment(),
        };

        Ok(Self {
            runtime,
            telemetry: TelemetryConfig::for_service(SERVICE_NAME),
            deployment,
            max_retries: env::var("PUBSUB_NODE_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        })
    }

    /// Deployment containing only `orders/order-events`.
    pub fn builtin_deployment() -> DeploymentConfig {
        DeploymentConfig::default().with_subscription(
            ORDERS_TOPIC,
            ORDER_EVENTS_SUBSCRIPTION,
            SERVICE_NAME,
        )
    }
}
