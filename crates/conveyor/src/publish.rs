//! Queue publisher.

use std::time::{Duration, Instant};

use snafu::prelude::*;
use tracing::debug;

use conveyor_core::emit;
use conveyor_core::metrics::events::{OrderPublished, PublishDuration};

use crate::broker::{ConnectionPool, Message};
use crate::error::{AcquireSnafu, PublishError, SendSnafu, TimeoutSnafu};

/// Publishes JSON payloads as text messages through a shared connection pool.
///
/// Failures are returned to the caller as they are; there is no retry here.
#[derive(Debug, Clone)]
pub struct QueuePublisher {
    pool: ConnectionPool,
    timeout: Duration,
}

impl QueuePublisher {
    pub fn new(pool: ConnectionPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Publish `json` to `queue` as a text message.
    ///
    /// The whole operation, including waiting for a pooled connection, must
    /// finish within the publish timeout.
    pub async fn publish(&self, queue: &str, json: &str) -> Result<(), PublishError> {
        let started = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.send(queue, json)).await {
            Ok(result) => result,
            Err(_) => TimeoutSnafu {
                queue,
                timeout: self.timeout,
            }
            .fail(),
        };

        emit!(PublishDuration {
            duration: started.elapsed(),
            queue: queue.to_string(),
        });

        if result.is_ok() {
            debug!(queue, bytes = json.len(), "Published text message");
            emit!(OrderPublished {
                queue: queue.to_string(),
            });
        }
        result
    }

    async fn send(&self, queue: &str, json: &str) -> Result<(), PublishError> {
        let mut conn = self.pool.acquire().await.context(AcquireSnafu)?;
        conn.send(queue, Message::text(json))
            .await
            .context(SendSnafu { queue })
    }
}
