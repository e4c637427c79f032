//! # Pub/Sub Node
//!
//! Runs the order fulfillment subscription against the in-process broker.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (from env)
//! 2. Initialize telemetry (logs, optional OTLP export, metrics)
//! 3. Register subscriptions; any configuration error ends the process
//!    with a non-zero status before traffic is served
//! 4. Publish the sample orders and report how each was settled

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use pubsub_node::orders::sample_orders;
use pubsub_node::{Fulfillment, NodeConfig, NodeRuntime};
use pubsub_telemetry::{encode_metrics, init_telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("failed to load node configuration")?;
    let _telemetry = init_telemetry(config.telemetry.clone())
        .await
        .context("failed to initialize telemetry")?;

    let fulfillment = Arc::new(Fulfillment::with_stock([("widget", 10), ("gadget", 5)]));
    let mut runtime = NodeRuntime::new(config, fulfillment)?;

    if let Err(e) = runtime.start() {
        error!(error = %e, "Subscription registration failed");
        return Err(e).context("refusing to serve traffic with an invalid configuration");
    }

    for order in sample_orders() {
        let report = runtime.publish(&order).await?;
        info!(
            order_id = order.order_id,
            acked = report.all_acked(),
            "Order settled"
        );
    }

    let shipped = runtime.fulfillment().shipped();
    info!(shipped = ?shipped, "Orders shipped");
    for dead in runtime.broker().dead_letters() {
        info!(
            msg_id = %dead.message_id,
            attempts = dead.attempts,
            error = %dead.last_error,
            "Dead letter"
        );
    }

    runtime.shutdown();
    println!("{}", encode_metrics()?);
    Ok(())
}
