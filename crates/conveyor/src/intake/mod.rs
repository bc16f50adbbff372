//! Order intake.
//!
//! Creates orders on behalf of callers and hands them to the pipeline by
//! dropping a file into a route's watched directory. The file appears under
//! its final name only once fully written, so an ingester never reads a
//! partial order.
//!
//! This is a library seam for an embedding service: it owns one
//! `Arc<OrderStore>`, shares it between its `OrderIntake` and its read
//! handlers, and answers lookups with [`OrderIntake::get_order`] and
//! [`OrderIntake::orders_for_customer`]. The `submit` subcommand is a one-shot
//! process and only uses the write path.

mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use snafu::prelude::*;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::error::{
    EncodeOrderSnafu, IntakeError, InvalidRequestSnafu, NotFoundSnafu, WriteOrderSnafu,
};
use crate::order::{self, Order, OrderStatus};

pub use store::OrderStore;

/// Caller-supplied fields of a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub customer_id: String,
    pub product: String,
    pub amount: f64,
}

impl NewOrder {
    /// Reject blank identifiers and amounts that are not positive.
    pub fn validate(&self) -> Result<(), IntakeError> {
        ensure!(
            !self.customer_id.trim().is_empty(),
            InvalidRequestSnafu {
                field: "customerId",
                reason: "must not be blank",
            }
        );
        ensure!(
            !self.product.trim().is_empty(),
            InvalidRequestSnafu {
                field: "product",
                reason: "must not be blank",
            }
        );
        ensure!(
            self.amount.is_finite() && self.amount > 0.0,
            InvalidRequestSnafu {
                field: "amount",
                reason: "must be a positive number",
            }
        );
        Ok(())
    }
}

/// Creates orders and drops them into a watched directory.
#[derive(Debug, Clone)]
pub struct OrderIntake {
    store: Arc<OrderStore>,
    drop_dir: PathBuf,
}

impl OrderIntake {
    pub fn new(store: Arc<OrderStore>, drop_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            drop_dir: drop_dir.into(),
        }
    }

    pub fn drop_dir(&self) -> &Path {
        &self.drop_dir
    }

    /// Validate the request, assign an id, record the order and write it for
    /// ingestion. Invalid requests are neither stored nor written.
    ///
    /// Returns the created order and the path of the dropped file.
    pub async fn create_order(&self, new: NewOrder) -> Result<(Order, PathBuf), IntakeError> {
        new.validate()?;

        let order = Order {
            order_id: Some(Uuid::new_v4().to_string()),
            customer_id: Some(new.customer_id),
            product: Some(new.product),
            amount: new.amount,
            status: Some(OrderStatus::Created),
        };
        let body = order::encode(&order).context(EncodeOrderSnafu)?;

        self.store.save(order.clone());

        let path = self.write_atomic(order.id(), &body).await?;
        info!(
            order_id = order.id(),
            customer_id = order.customer(),
            amount = order.amount,
            file = %path.display(),
            "Order created"
        );
        Ok((order, path))
    }

    pub fn get_order(&self, order_id: &str) -> Result<Order, IntakeError> {
        self.store
            .find_by_id(order_id)
            .context(NotFoundSnafu { order_id })
    }

    pub fn orders_for_customer(&self, customer_id: &str) -> Vec<Order> {
        self.store.find_by_customer(customer_id)
    }

    async fn write_atomic(&self, order_id: &str, body: &str) -> Result<PathBuf, IntakeError> {
        fs::create_dir_all(&self.drop_dir)
            .await
            .context(WriteOrderSnafu {
                path: &self.drop_dir,
            })?;

        let temp = self.drop_dir.join(format!(".order-{order_id}.json.tmp"));
        let path = self.drop_dir.join(format!("order-{order_id}.json"));

        fs::write(&temp, body)
            .await
            .context(WriteOrderSnafu { path: &temp })?;
        if let Err(source) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(source).context(WriteOrderSnafu { path: &path });
        }
        Ok(path)
    }
}
