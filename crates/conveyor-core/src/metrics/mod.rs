//! Metrics and observability infrastructure.
//!
//! - `events`: Internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and the HTTP exposition endpoint

pub mod events;
pub mod server;

pub use server::{DEFAULT_METRICS_ADDR, MetricsController, init_global, init_test};

/// Emit an internal event as metrics.
///
/// ```ignore
/// use conveyor_core::emit;
/// use conveyor_core::metrics::events::OrderPublished;
///
/// emit!(OrderPublished { queue: "ORDER.CREATED.QUEUE".to_string() });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
