//! Service layer: registration and the per-delivery pipeline.

pub mod dispatcher;
pub mod isolation;
pub mod registry;
pub mod subscription;

pub use dispatcher::Dispatcher;
pub use isolation::{panic_message, run_isolated};
pub use registry::SubscriptionRegistry;
pub use subscription::{Subscription, SubscriptionConfig};
