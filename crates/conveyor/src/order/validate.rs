use super::Order;
use crate::error::ValidationError;

/// Check an order before it may be published.
///
/// Checks run in a fixed order and stop at the first failure:
/// order id, customer id, then amount. Product and status are not checked.
pub fn validate(order: &Order) -> Result<(), ValidationError> {
    if order.order_id.as_deref().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingOrderId);
    }
    if order.customer_id.as_deref().is_none_or(str::is_empty) {
        return Err(ValidationError::MissingCustomerId);
    }
    if order.amount.is_nan() || order.amount <= 0.0 {
        return Err(ValidationError::NonPositiveAmount);
    }
    Ok(())
}
