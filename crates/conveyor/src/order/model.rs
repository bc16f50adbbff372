//! Order data model.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Lifecycle state of an order. The pipeline carries it through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order document.
///
/// Identifiers are optional at this level so that documents missing them
/// still decode and can be reported by the validator with a precise reason.
/// Field declaration order is the canonical wire order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default, deserialize_with = "amount_or_zero")]
    pub amount: f64,
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

impl Order {
    /// Order id for logging, empty when absent.
    pub fn id(&self) -> &str {
        self.order_id.as_deref().unwrap_or_default()
    }

    /// Customer id for logging, empty when absent.
    pub fn customer(&self) -> &str {
        self.customer_id.as_deref().unwrap_or_default()
    }
}

/// An explicit `null` amount reads as zero, like an absent one.
fn amount_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or_default())
}
