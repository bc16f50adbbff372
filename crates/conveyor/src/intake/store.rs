//! In-memory order registry.

use dashmap::DashMap;

use crate::order::Order;

/// Concurrent map of created orders keyed by order id.
///
/// Shared behind an `Arc` by the writer and any number of readers.
#[derive(Debug, Default)]
pub struct OrderStore {
    orders: DashMap<String, Order>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order. Orders without an id are ignored.
    pub fn save(&self, order: Order) {
        if let Some(id) = order.order_id.clone().filter(|id| !id.is_empty()) {
            self.orders.insert(id, order);
        }
    }

    pub fn find_by_id(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    /// All orders of a customer, ordered by order id.
    pub fn find_by_customer(&self, customer_id: &str) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| entry.customer_id.as_deref() == Some(customer_id))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
