//! Bounded broker connection pool.
//!
//! Publishers share one pool per process. At most `max_size` connections are
//! checked out at once; returned connections are cached for reuse so that a
//! publish does not pay for a connect/disconnect cycle. Connections that
//! failed or were abandoned mid-operation are dropped instead of cached.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use snafu::prelude::*;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use conveyor_core::emit;
use conveyor_core::metrics::events::{PoolConnectionOpened, PoolIdleConnections};

use super::{Connection, ConnectionFactoryRef, Message};
use crate::error::{
    BrokerError, ClosedSnafu, ConnectSnafu, ConnectionClosedSnafu, ExhaustedSnafu, PoolError,
};

/// Pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum connections, checked out and cached together.
    pub max_size: usize,
    /// How long `acquire` waits for a free slot.
    pub acquire_timeout: Duration,
}

struct PoolInner {
    factory: ConnectionFactoryRef,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, Vec<Box<dyn Connection>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_idle(&self) -> Option<Box<dyn Connection>> {
        let mut idle = self.idle();
        while let Some(conn) = idle.pop() {
            if conn.is_open() {
                return Some(conn);
            }
            debug!("Discarding closed idle connection");
        }
        None
    }

    fn release(&self, conn: Box<dyn Connection>) {
        let mut idle = self.idle();
        if idle.len() < self.config.max_size && !self.permits.is_closed() {
            idle.push(conn);
        }
        emit!(PoolIdleConnections { count: idle.len() });
    }
}

/// Shared, internally synchronized pool of broker connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("broker", &self.inner.factory.describe())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    pub fn new(factory: ConnectionFactoryRef, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(Vec::with_capacity(config.max_size)),
                permits: Arc::new(Semaphore::new(config.max_size)),
                config,
            }),
        }
    }

    /// Check out a connection, reusing a cached one when possible.
    ///
    /// # Errors
    ///
    /// [`PoolError::Exhausted`] when no slot frees up within the acquire
    /// timeout, [`PoolError::Connect`] when a new connection cannot be opened.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let waited = self.inner.config.acquire_timeout;
        let permit = match tokio::time::timeout(waited, self.inner.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return ClosedSnafu.fail(),
            Err(_) => return ExhaustedSnafu { waited }.fail(),
        };

        let conn = match self.inner.take_idle() {
            Some(conn) => conn,
            None => {
                let conn = self.inner.factory.connect().await.context(ConnectSnafu)?;
                emit!(PoolConnectionOpened);
                debug!(broker = %self.inner.factory.describe(), "Opened pooled connection");
                conn
            }
        };

        Ok(PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
            broken: false,
            _permit: permit,
        })
    }

    /// Connections cached and ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Slots that can be checked out without waiting.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Refuse further checkouts and drop cached connections.
    pub fn close(&self) {
        self.inner.permits.close();
        self.inner.idle().clear();
    }
}

/// A checked-out connection. Returned to the pool on drop unless broken.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    pool: Arc<PoolInner>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn send(&mut self, queue: &str, message: Message) -> Result<(), BrokerError> {
        let conn = self.conn.as_mut().context(ConnectionClosedSnafu)?;
        // Stays set if the send is cancelled midway.
        self.broken = true;
        let result = conn.send(queue, message).await;
        self.broken = result.is_err();
        result
    }

    /// Drop the connection instead of caching it.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.broken || !conn.is_open() {
                debug!("Discarding broken pooled connection");
                return;
            }
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;

    const QUEUE: &str = "ORDER.CREATED.QUEUE";

    fn pool(broker: &MemoryBroker, max_size: usize) -> ConnectionPool {
        ConnectionPool::new(
            Arc::new(broker.connection_factory(None)),
            PoolConfig {
                max_size,
                acquire_timeout: Duration::from_millis(50),
            },
        )
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, 2);

        for _ in 0..5 {
            let mut conn = pool.acquire().await.unwrap();
            conn.send(QUEUE, Message::text("x")).await.unwrap();
        }

        assert_eq!(broker.connections_opened(), 1);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(broker.depth(QUEUE), 5);
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, 1);

        let held = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::Exhausted { .. }));

        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_broken_connection_is_not_cached() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, 2);

        broker.set_online(false);
        assert!(matches!(
            pool.acquire().await.err().unwrap(),
            PoolError::Connect { .. }
        ));
        broker.set_online(true);

        {
            let mut conn = pool.acquire().await.unwrap();
            broker.set_online(false);
            assert!(conn.send(QUEUE, Message::text("x")).await.is_err());
        }
        assert_eq!(pool.idle_count(), 0);

        broker.set_online(true);
        let mut conn = pool.acquire().await.unwrap();
        conn.send(QUEUE, Message::text("x")).await.unwrap();
        assert_eq!(broker.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_mark_broken_discards() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, 2);

        let mut conn = pool.acquire().await.unwrap();
        conn.mark_broken();
        drop(conn);

        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_checkout() {
        let broker = MemoryBroker::new();
        let pool = pool(&broker, 2);
        drop(pool.acquire().await.unwrap());

        pool.close();
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.acquire().await.err().unwrap(), PoolError::Closed));
    }
}
