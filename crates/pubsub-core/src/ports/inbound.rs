//! Inbound Ports (Driving Ports)
//!
//! The handler interface application code implements for each subscription.

use crate::domain::DeliveryContext;
use crate::error::HandlerError;
use async_trait::async_trait;
use std::future::Future;

/// Handles messages of type `T` for one subscription.
///
/// Returning `Err` asks the broker to redeliver. A panic is caught by the
/// pipeline and reported as an internal error; it never takes the process
/// down.
///
/// Any `Fn(DeliveryContext, T) -> impl Future<Output = Result<(), HandlerError>>`
/// is a handler:
///
/// ```
/// use pubsub_core::{DeliveryContext, HandlerError, MessageHandler};
///
/// async fn on_order(_ctx: DeliveryContext, order_id: u64) -> Result<(), HandlerError> {
///     anyhow::ensure!(order_id > 0, "order id must be positive");
///     Ok(())
/// }
///
/// fn assert_handler<H: MessageHandler<u64>>(_: &H) {}
/// assert_handler(&on_order);
/// ```
#[async_trait]
pub trait MessageHandler<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Process one decoded message.
    async fn handle(&self, ctx: DeliveryContext, message: T) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(DeliveryContext, T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: DeliveryContext, message: T) -> Result<(), HandlerError> {
        (self)(ctx, message).await
    }
}
