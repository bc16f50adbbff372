//! Queue consumption.
//!
//! A fixed number of workers share the consumer queue. Each worker owns a
//! broker connection, processes one message at a time and settles it only
//! after the handler has finished.

mod handler;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info};

use conveyor_core::topology::ComponentContext;

use crate::broker::ConnectionFactoryRef;
use crate::config::{ConsumerConfig, RouteKey};
use crate::error::PipelineError;

pub use handler::{LoggingHandler, OrderHandler};
pub use worker::{handle_delivery, on_message};

use worker::{Worker, WorkerTiming};

/// Component key of the queue consumer.
pub const CONSUMER_KEY: &str = "consumer";

/// How long a receive may overrun its wait window before the connection is
/// replaced.
const RECEIVE_GRACE: Duration = Duration::from_secs(5);

/// Consumes orders from one queue with a pool of workers.
pub struct QueueConsumer {
    key: RouteKey,
    config: ConsumerConfig,
    factory: ConnectionFactoryRef,
    handler: Arc<dyn OrderHandler>,
    context: ComponentContext,
}

impl QueueConsumer {
    pub fn new(
        config: ConsumerConfig,
        factory: ConnectionFactoryRef,
        handler: Arc<dyn OrderHandler>,
        context: ComponentContext,
    ) -> Self {
        Self {
            key: RouteKey::new(CONSUMER_KEY),
            config,
            factory,
            handler,
            context,
        }
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    /// Run all workers until shutdown.
    pub async fn run(self) -> Result<(), PipelineError> {
        let timing = WorkerTiming {
            receive_wait: self.config.receive_wait(),
            receive_grace: RECEIVE_GRACE,
            processing_timeout: self.config.processing_timeout(),
            reconnect_backoff: self.config.reconnect_backoff(),
        };
        let concurrency = self.config.concurrency.max(1);

        info!(
            target = %self.key,
            queue = %self.config.queue,
            concurrency,
            broker = %self.factory.describe(),
            "Consumer started"
        );

        let mut workers = JoinSet::new();
        for id in 0..concurrency {
            let worker = Worker {
                id,
                queue: self.config.queue.clone(),
                factory: self.factory.clone(),
                handler: self.handler.clone(),
                timing,
                shutdown: self.context.shutdown.clone(),
            };
            workers.spawn(worker.run());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(target = %self.key, error = %e, "Consumer worker panicked");
            }
        }

        info!(target = %self.key, "Consumer stopped");
        Ok(())
    }
}
