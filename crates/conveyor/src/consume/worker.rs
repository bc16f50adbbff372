//! Message handling and the per-connection receive loop.

use std::sync::Arc;
use std::time::Duration;

use snafu::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use conveyor_core::emit;
use conveyor_core::metrics::events::{ConsumeOutcome, MessageConsumed};

use super::OrderHandler;
use crate::broker::{Connection, ConnectionFactoryRef, Delivery, Payload};
use crate::error::{ConsumeError, ReceiveSnafu, SettleSnafu, TimedOutSnafu, UndecodableSnafu};
use crate::order::{self, Order};

/// Decode a message body and run the handler on it within `timeout`.
pub async fn on_message(
    payload: &Payload,
    handler: &dyn OrderHandler,
    redelivered: bool,
    timeout: Duration,
) -> Result<Order, ConsumeError> {
    let order = order::decode(payload.as_bytes()).context(UndecodableSnafu)?;

    match tokio::time::timeout(timeout, handler.handle(&order, redelivered)).await {
        Ok(result) => result?,
        Err(_) => return TimedOutSnafu { timeout }.fail(),
    }
    Ok(order)
}

/// Process a delivery and settle it with the broker.
///
/// The message is acknowledged only after the handler succeeded. Undecodable
/// messages are rejected without redelivery. Handler failures and timeouts
/// are negatively acknowledged and returned, so the broker redelivers.
pub async fn handle_delivery(
    delivery: Delivery,
    handler: &dyn OrderHandler,
    timeout: Duration,
    queue: &str,
) -> Result<ConsumeOutcome, ConsumeError> {
    let redelivered = delivery.is_redelivery();
    let result = on_message(&delivery.message.payload, handler, redelivered, timeout).await;

    let outcome = match result {
        Ok(order) => {
            delivery.ack().await.context(SettleSnafu)?;
            debug!(order_id = order.id(), queue, "Message acknowledged");
            ConsumeOutcome::Acked
        }
        Err(e @ ConsumeError::Undecodable { .. }) => {
            error!(
                queue,
                bytes = delivery.message.payload.len(),
                reason = %e,
                "Rejecting undecodable message"
            );
            delivery.reject().await.context(SettleSnafu)?;
            ConsumeOutcome::Rejected
        }
        Err(e) => {
            if let Err(settle) = delivery.nack().await {
                warn!(queue, error = %settle, "Failed to return message for redelivery");
            }
            emit!(MessageConsumed {
                outcome: ConsumeOutcome::Redelivered,
                queue: queue.to_string(),
            });
            return Err(e);
        }
    };

    emit!(MessageConsumed {
        outcome,
        queue: queue.to_string(),
    });
    Ok(outcome)
}

/// Timing for a worker.
#[derive(Debug, Clone, Copy)]
pub(super) struct WorkerTiming {
    pub receive_wait: Duration,
    /// Extra time a receive may take beyond `receive_wait` before the
    /// connection is considered stalled.
    pub receive_grace: Duration,
    pub processing_timeout: Duration,
    pub reconnect_backoff: Duration,
}

/// One receive loop with its own broker connection.
pub(super) struct Worker {
    pub id: usize,
    pub queue: String,
    pub factory: ConnectionFactoryRef,
    pub handler: Arc<dyn OrderHandler>,
    pub timing: WorkerTiming,
    pub shutdown: CancellationToken,
}

impl Worker {
    /// Receive and process until shutdown, reconnecting after failures.
    ///
    /// A message being processed when shutdown arrives is finished and
    /// settled first.
    pub async fn run(self) {
        loop {
            let connected = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                result = self.factory.connect() => result,
            };

            match connected {
                Ok(mut conn) => {
                    debug!(worker = self.id, queue = %self.queue, "Consumer connected");
                    if self.receive_loop(conn.as_mut()).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Consumer failed to connect");
                }
            }

            if self
                .shutdown
                .run_until_cancelled(tokio::time::sleep(self.timing.reconnect_backoff))
                .await
                .is_none()
            {
                break;
            }
        }
        info!(worker = self.id, queue = %self.queue, "Consumer worker stopped");
    }

    /// Returns true on shutdown, false when the connection must be replaced.
    async fn receive_loop(&self, conn: &mut dyn Connection) -> bool {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return true,
                result = self.receive(conn) => result,
            };

            match received {
                Ok(Some(delivery)) => {
                    let result = handle_delivery(
                        delivery,
                        self.handler.as_ref(),
                        self.timing.processing_timeout,
                        &self.queue,
                    )
                    .await;
                    if let Err(e) = result {
                        error!(
                            worker = self.id,
                            queue = %self.queue,
                            error = %e,
                            "Message processing failed, left for redelivery"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker = self.id, error = %e, "Receive failed, reconnecting");
                    return false;
                }
            }

            if !conn.is_open() {
                warn!(worker = self.id, "Consumer connection closed, reconnecting");
                return false;
            }
        }
    }

    async fn receive(&self, conn: &mut dyn Connection) -> Result<Option<Delivery>, ConsumeError> {
        let wait = self.timing.receive_wait;
        let guard = wait + self.timing.receive_grace;

        match tokio::time::timeout(guard, conn.receive(&self.queue, wait)).await {
            Ok(result) => result.context(ReceiveSnafu { queue: &self.queue }),
            Err(_) => TimedOutSnafu { timeout: guard }.fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::testing::SlowFactory;
    use crate::broker::{ConnectionFactory, MemoryBroker, Message};
    use crate::error::HandlerSnafu;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const QUEUE: &str = "ORDER.CREATED.QUEUE";
    const ORDER: &str = r#"{"orderId":"O1","customerId":"C1","product":"Widget","amount":25.50,"status":"CREATED"}"#;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(String, bool)>>,
    }

    #[async_trait]
    impl OrderHandler for Recording {
        async fn handle(&self, order: &Order, redelivered: bool) -> Result<(), ConsumeError> {
            self.seen
                .lock()
                .unwrap()
                .push((order.id().to_string(), redelivered));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl OrderHandler for Failing {
        async fn handle(&self, order: &Order, _redelivered: bool) -> Result<(), ConsumeError> {
            HandlerSnafu {
                order_id: order.id(),
                message: "downstream unavailable",
            }
            .fail()
        }
    }

    struct Slow;

    #[async_trait]
    impl OrderHandler for Slow {
        async fn handle(&self, _order: &Order, _redelivered: bool) -> Result<(), ConsumeError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    async fn deliver(broker: &MemoryBroker, body: &str) -> Delivery {
        broker.publish(QUEUE, Message::text(body)).unwrap();
        let mut conn = broker.connection_factory(None).connect().await.unwrap();
        conn.receive(QUEUE, Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_acknowledges() {
        let broker = MemoryBroker::new();
        let handler = Recording::default();
        let delivery = deliver(&broker, ORDER).await;

        let outcome = handle_delivery(delivery, &handler, Duration::from_secs(1), QUEUE)
            .await
            .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Acked);
        assert_eq!(*handler.seen.lock().unwrap(), vec![("O1".to_string(), false)]);
        assert_eq!(broker.in_flight(QUEUE), 0);
        assert_eq!(broker.depth(QUEUE), 0);
    }

    #[tokio::test]
    async fn test_undecodable_is_rejected() {
        let broker = MemoryBroker::new();
        let handler = Recording::default();
        let delivery = deliver(&broker, "definitely not an order").await;

        let outcome = handle_delivery(delivery, &handler, Duration::from_secs(1), QUEUE)
            .await
            .unwrap();

        assert_eq!(outcome, ConsumeOutcome::Rejected);
        assert!(handler.seen.lock().unwrap().is_empty());
        assert_eq!(broker.depth(QUEUE), 0);
        assert_eq!(broker.dead_letters(QUEUE).len(), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_is_redelivered() {
        let broker = MemoryBroker::new();
        let delivery = deliver(&broker, ORDER).await;

        let err = handle_delivery(delivery, &Failing, Duration::from_secs(1), QUEUE)
            .await
            .unwrap_err();

        assert!(matches!(err, ConsumeError::Handler { .. }));
        assert_eq!(broker.depth(QUEUE), 1);
        assert!(broker.dead_letters(QUEUE).is_empty());
    }

    #[tokio::test]
    async fn test_handler_timeout_is_redelivered() {
        let broker = MemoryBroker::new();
        let delivery = deliver(&broker, ORDER).await;

        let err = handle_delivery(delivery, &Slow, Duration::from_millis(20), QUEUE)
            .await
            .unwrap_err();

        assert!(matches!(err, ConsumeError::TimedOut { .. }));
        assert_eq!(broker.depth(QUEUE), 1);
    }

    #[tokio::test]
    async fn test_on_message_accepts_binary_payload() {
        let payload = Payload::Binary(bytes::Bytes::from_static(ORDER.as_bytes()));
        let order = on_message(&payload, &Recording::default(), false, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(order.amount, 25.5);
    }

    #[tokio::test]
    async fn test_worker_reconnects_after_outage() {
        let broker = MemoryBroker::new();
        let handler = Arc::new(Recording::default());
        let shutdown = CancellationToken::new();

        let worker = Worker {
            id: 0,
            queue: QUEUE.to_string(),
            factory: Arc::new(broker.connection_factory(None)),
            handler: handler.clone(),
            timing: WorkerTiming {
                receive_wait: Duration::from_millis(10),
                receive_grace: Duration::from_secs(5),
                processing_timeout: Duration::from_secs(1),
                reconnect_backoff: Duration::from_millis(10),
            },
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(worker.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.set_online(false);
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.set_online(true);
        broker.publish(QUEUE, Message::text(ORDER)).unwrap();

        for _ in 0..200 {
            if !handler.seen.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(handler.seen.lock().unwrap().len(), 1);
        assert!(broker.connections_opened() >= 2);
    }

    fn stalled_worker(factory: &SlowFactory, shutdown: &CancellationToken) -> Worker {
        Worker {
            id: 0,
            queue: QUEUE.to_string(),
            factory: Arc::new(factory.clone()),
            handler: Arc::new(Recording::default()),
            timing: WorkerTiming {
                receive_wait: Duration::from_millis(10),
                receive_grace: Duration::from_millis(20),
                processing_timeout: Duration::from_secs(1),
                reconnect_backoff: Duration::from_millis(10),
            },
            shutdown: shutdown.clone(),
        }
    }

    #[tokio::test]
    async fn test_stalled_receive_times_out() {
        let mut factory = SlowFactory::new(&MemoryBroker::new());
        factory.receive_delay = Duration::from_secs(5);
        let worker = stalled_worker(&factory, &CancellationToken::new());

        let mut conn = factory.connect().await.unwrap();
        let err = worker.receive(conn.as_mut()).await.unwrap_err();

        assert!(
            matches!(err, ConsumeError::TimedOut { timeout } if timeout == Duration::from_millis(30))
        );
    }

    #[tokio::test]
    async fn test_stalled_receive_reconnects() {
        let mut factory = SlowFactory::new(&MemoryBroker::new());
        factory.receive_delay = Duration::from_secs(5);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(stalled_worker(&factory, &shutdown).run());

        for _ in 0..200 {
            if factory.connects() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        task.await.unwrap();

        assert!(factory.connects() >= 3);
    }
}
