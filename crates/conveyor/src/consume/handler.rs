//! Terminal processing of consumed orders.

use async_trait::async_trait;
use tracing::info;

use crate::error::ConsumeError;
use crate::order::Order;

/// Performs the downstream action for a consumed order.
///
/// Messages are delivered at least once, so implementations must tolerate
/// seeing the same `orderId` more than once. Returning an error leaves the
/// message unacknowledged and hands it back to the broker for redelivery.
#[async_trait]
pub trait OrderHandler: Send + Sync {
    async fn handle(&self, order: &Order, redelivered: bool) -> Result<(), ConsumeError>;
}

/// Logs each order. Stateless, so redelivery produces the same outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl OrderHandler for LoggingHandler {
    async fn handle(&self, order: &Order, redelivered: bool) -> Result<(), ConsumeError> {
        info!(
            order_id = order.id(),
            customer_id = order.customer(),
            amount = order.amount,
            product = order.product.as_deref().unwrap_or_default(),
            status = order.status.map(|s| s.as_str()).unwrap_or_default(),
            redelivered,
            "Processing order"
        );
        Ok(())
    }
}
