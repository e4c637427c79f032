//! Order fulfillment subscription.
//!
//! Ships orders against an in-memory stock table. Running out of stock is a
//! business error the broker retries; an order with zero quantity is treated
//! as corrupt and the handler panics on it.

use async_trait::async_trait;
use parking_lot::Mutex;
use pubsub_core::{DeliveryContext, HandlerError, MessageHandler};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub const ORDERS_TOPIC: &str = "orders";
pub const ORDER_EVENTS_SUBSCRIPTION: &str = "order-events";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: u64,
    pub sku: String,
    pub quantity: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FulfillmentError {
    #[error("insufficient-stock")]
    InsufficientStock { sku: String, requested: u32, available: u32 },

    #[error("unknown sku {0}")]
    UnknownSku(String),
}

/// Stock table plus the orders shipped from it.
#[derive(Debug, Default)]
pub struct Fulfillment {
    stock: Mutex<HashMap<String, u32>>,
    shipped: Mutex<Vec<u64>>,
}

impl Fulfillment {
    pub fn with_stock<'a>(items: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        Self {
            stock: Mutex::new(
                items
                    .into_iter()
                    .map(|(sku, qty)| (sku.to_string(), qty))
                    .collect(),
            ),
            shipped: Mutex::new(Vec::new()),
        }
    }

    pub fn shipped(&self) -> Vec<u64> {
        self.shipped.lock().clone()
    }

    pub fn available(&self, sku: &str) -> Option<u32> {
        self.stock.lock().get(sku).copied()
    }

    fn ship(&self, order: &OrderPlaced) -> Result<(), FulfillmentError> {
        if order.quantity == 0 {
            panic!("order {} has zero quantity", order.order_id);
        }

        let mut stock = self.stock.lock();
        let available = stock
            .get_mut(&order.sku)
            .ok_or_else(|| FulfillmentError::UnknownSku(order.sku.clone()))?;
        if *available < order.quantity {
            return Err(FulfillmentError::InsufficientStock {
                sku: order.sku.clone(),
                requested: order.quantity,
                available: *available,
            });
        }
        *available -= order.quantity;
        drop(stock);

        self.shipped.lock().push(order.order_id);
        Ok(())
    }
}

/// Subscription handler shipping each [`OrderPlaced`].
#[derive(Debug, Clone)]
pub struct FulfillmentHandler {
    fulfillment: Arc<Fulfillment>,
}

impl FulfillmentHandler {
    pub fn new(fulfillment: Arc<Fulfillment>) -> Self {
        Self { fulfillment }
    }
}

#[async_trait]
impl MessageHandler<OrderPlaced> for FulfillmentHandler {
    async fn handle(&self, ctx: DeliveryContext, order: OrderPlaced) -> Result<(), HandlerError> {
        self.fulfillment.ship(&order)?;
        info!(
            order_id = order.order_id,
            sku = %order.sku,
            msg_id = %ctx.message_id(),
            delivery_attempt = ctx.attempt(),
            "Order shipped"
        );
        Ok(())
    }
}

/// Orders the binary publishes on startup.
pub fn sample_orders() -> Vec<OrderPlaced> {
    vec![
        OrderPlaced {
            order_id: 1001,
            sku: "widget".to_string(),
            quantity: 2,
        },
        OrderPlaced {
            order_id: 1002,
            sku: "gadget".to_string(),
            quantity: 50,
        },
        OrderPlaced {
            order_id: 1003,
            sku: "widget".to_string(),
            quantity: 0,
        },
        OrderPlaced {
            order_id: 1004,
            sku: "gizmo".to_string(),
            quantity: 1,
        },
    ]
}
