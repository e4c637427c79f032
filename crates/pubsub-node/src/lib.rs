//! # Pub/Sub Node Library
//!
//! Bootstrap pieces of the `pubsub-node` binary, exposed for testing.
//!
//! - `config/` - node configuration from the environment
//! - `orders/` - the order fulfillment subscription
//! - `runtime/` - broker, registry and telemetry wiring

pub mod config;
pub mod orders;
pub mod runtime;

pub use config::NodeConfig;
pub use orders::{Fulfillment, FulfillmentError, FulfillmentHandler, OrderPlaced};
pub use runtime::NodeRuntime;
