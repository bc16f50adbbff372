//! Slow connections for exercising timeouts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Connection, ConnectionFactory, Delivery, MemoryBroker, Message};
use crate::error::BrokerError;

/// Opens connections that take `send_delay` to confirm a send and
/// `receive_delay` before reporting an empty receive.
#[derive(Debug, Clone)]
pub(crate) struct SlowFactory {
    pub broker: MemoryBroker,
    /// Enqueue the message before stalling, as if only the confirmation was slow.
    pub deliver: bool,
    pub send_delay: Duration,
    pub receive_delay: Duration,
    pub connects: Arc<AtomicUsize>,
}

impl SlowFactory {
    pub fn new(broker: &MemoryBroker) -> Self {
        Self {
            broker: broker.clone(),
            deliver: false,
            send_delay: Duration::ZERO,
            receive_delay: Duration::ZERO,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionFactory for SlowFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, BrokerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SlowConnection {
            factory: self.clone(),
        }))
    }

    fn describe(&self) -> String {
        "slow://test".to_string()
    }
}

struct SlowConnection {
    factory: SlowFactory,
}

#[async_trait]
impl Connection for SlowConnection {
    async fn send(&mut self, queue: &str, message: Message) -> Result<(), BrokerError> {
        if self.factory.deliver {
            self.factory.broker.publish(queue, message)?;
        }
        tokio::time::sleep(self.factory.send_delay).await;
        Ok(())
    }

    async fn receive(
        &mut self,
        _queue: &str,
        _wait: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        tokio::time::sleep(self.factory.receive_delay).await;
        Ok(None)
    }

    fn is_open(&self) -> bool {
        true
    }
}
