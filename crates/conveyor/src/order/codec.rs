//! Canonical JSON encoding for orders.

use snafu::prelude::*;

use super::Order;
use crate::error::{CodecError, DecodeSnafu, EncodeSnafu};

/// Encode an order as compact JSON in canonical field order.
pub fn encode(order: &Order) -> Result<String, CodecError> {
    serde_json::to_string(order).context(EncodeSnafu)
}

/// Decode an order from JSON bytes.
///
/// Unknown fields are ignored; a payload that is not a JSON object of the
/// expected shape is rejected.
pub fn decode(bytes: &[u8]) -> Result<Order, CodecError> {
    serde_json::from_slice(bytes).context(DecodeSnafu)
}
