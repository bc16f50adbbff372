//! Orders: the unit of work flowing through the pipeline.
//!
//! - `model`: `Order` and `OrderStatus`
//! - `codec`: canonical JSON encoding shared by producer and consumer
//! - `validate`: business validation applied before publishing

mod codec;
mod model;
mod validate;

pub use codec::{decode, encode};
pub use model::{Order, OrderStatus};
pub use validate::validate;
