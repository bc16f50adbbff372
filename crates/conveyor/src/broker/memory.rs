//! In-process broker.
//!
//! Queues live in memory and are shared by every connection made from the
//! same [`MemoryBroker`]. Brokers are registered by name, so all
//! `memory://<name>` URLs in one process reach the same queues. Unsettled
//! deliveries are redelivered until `max_deliveries` is reached, after which
//! the message moves to the queue's dead-letter list.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use snafu::prelude::*;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Acknowledger, Connection, ConnectionFactory, Credentials, Delivery, Message};
use crate::error::{
    AuthRejectedSnafu, BrokerError, ConnectionClosedSnafu, QueueFullSnafu, UnreachableSnafu,
};

/// Deliveries attempted before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERIES: u32 = 6;

static REGISTRY: LazyLock<Mutex<HashMap<String, MemoryBroker>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Behaviour of a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryBrokerOptions {
    /// Credentials every connection must present. `None` accepts anyone.
    pub credentials: Option<Credentials>,
    /// Maximum ready messages per queue. `None` is unbounded.
    pub max_queue_depth: Option<usize>,
    pub max_deliveries: u32,
}

impl Default for MemoryBrokerOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            max_queue_depth: None,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}

struct Envelope {
    message: Message,
    deliveries: u32,
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<Envelope>,
    in_flight: usize,
    dead: Vec<Message>,
    notify: Arc<Notify>,
}

enum Settlement {
    Ack,
    Nack,
    Reject,
}

struct Shared {
    name: String,
    options: MemoryBrokerOptions,
    online: AtomicBool,
    queues: Mutex<HashMap<String, QueueState>>,
    connections_opened: AtomicUsize,
}

impl Shared {
    fn url(&self) -> String {
        format!("memory://{}", self.name)
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, QueueState>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_online(&self) -> Result<(), BrokerError> {
        ensure!(
            self.online.load(Ordering::Acquire),
            UnreachableSnafu {
                url: self.url(),
                message: "broker is offline",
            }
        );
        Ok(())
    }

    fn enqueue(&self, queue: &str, message: Message) -> Result<(), BrokerError> {
        self.ensure_online()?;

        let mut queues = self.queues();
        let state = queues.entry(queue.to_string()).or_default();
        if let Some(capacity) = self.options.max_queue_depth
            && state.ready.len() >= capacity
        {
            return QueueFullSnafu { queue, capacity }.fail();
        }

        state.ready.push_back(Envelope {
            message,
            deliveries: 0,
        });
        state.notify.notify_one();
        Ok(())
    }

    /// Pop the next ready message, or hand back the notifier to wait on.
    fn try_pop(&self, queue: &str) -> Result<Result<Envelope, Arc<Notify>>, BrokerError> {
        self.ensure_online()?;

        let mut queues = self.queues();
        let state = queues.entry(queue.to_string()).or_default();
        let Some(mut envelope) = state.ready.pop_front() else {
            return Ok(Err(state.notify.clone()));
        };

        envelope.deliveries += 1;
        state.in_flight += 1;
        if !state.ready.is_empty() {
            state.notify.notify_one();
        }
        Ok(Ok(envelope))
    }

    fn settle(
        &self,
        queue: &str,
        envelope: Envelope,
        settlement: Settlement,
    ) -> Result<(), BrokerError> {
        let online = self.ensure_online();

        let mut queues = self.queues();
        let state = queues.entry(queue.to_string()).or_default();
        state.in_flight = state.in_flight.saturating_sub(1);

        // A lost connection hands the message back untouched.
        if online.is_err() {
            state.ready.push_front(envelope);
            state.notify.notify_one();
            return online;
        }

        match settlement {
            Settlement::Ack => {}
            Settlement::Nack if envelope.deliveries >= self.options.max_deliveries => {
                warn!(
                    queue,
                    deliveries = envelope.deliveries,
                    "Delivery limit reached, moving message to dead letters"
                );
                state.dead.push(envelope.message);
            }
            Settlement::Nack => {
                state.ready.push_back(envelope);
                state.notify.notify_one();
            }
            Settlement::Reject => state.dead.push(envelope.message),
        }
        Ok(())
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
        for state in self.queues().values() {
            state.notify.notify_waiters();
        }
    }
}

/// Handle to an in-process broker. Clones share the same queues.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// An unregistered broker with default options.
    pub fn new() -> Self {
        Self::with_options("local", MemoryBrokerOptions::default())
    }

    /// An unregistered broker.
    pub fn with_options(name: impl Into<String>, options: MemoryBrokerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                options,
                online: AtomicBool::new(true),
                queues: Mutex::new(HashMap::new()),
                connections_opened: AtomicUsize::new(0),
            }),
        }
    }

    /// The process-wide broker registered under `name`, created on first use.
    pub fn named(name: &str) -> Self {
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        registry
            .entry(name.to_string())
            .or_insert_with(|| Self::with_options(name, MemoryBrokerOptions::default()))
            .clone()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn connection_factory(&self, credentials: Option<Credentials>) -> MemoryConnectionFactory {
        MemoryConnectionFactory {
            broker: self.clone(),
            credentials,
        }
    }

    /// Take the broker off- or online. Offline brokers refuse connections and
    /// fail every operation on existing ones.
    pub fn set_online(&self, online: bool) {
        self.shared.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::Acquire)
    }

    /// Enqueue a message without going through a connection.
    pub fn publish(&self, queue: &str, message: Message) -> Result<(), BrokerError> {
        self.shared.enqueue(queue, message)
    }

    /// Messages waiting to be delivered.
    pub fn depth(&self, queue: &str) -> usize {
        self.shared.queues().get(queue).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet settled.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.shared.queues().get(queue).map_or(0, |q| q.in_flight)
    }

    /// Messages that were rejected or ran out of deliveries.
    pub fn dead_letters(&self, queue: &str) -> Vec<Message> {
        self.shared
            .queues()
            .get(queue)
            .map(|q| q.dead.clone())
            .unwrap_or_default()
    }

    /// Remove and return every ready message.
    pub fn drain(&self, queue: &str) -> Vec<Message> {
        self.shared
            .queues()
            .get_mut(queue)
            .map(|q| q.ready.drain(..).map(|e| e.message).collect())
            .unwrap_or_default()
    }

    /// Connections accepted since the broker was created.
    pub fn connections_opened(&self) -> usize {
        self.shared.connections_opened.load(Ordering::Relaxed)
    }
}

/// Opens connections to a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryConnectionFactory {
    broker: MemoryBroker,
    credentials: Option<Credentials>,
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, BrokerError> {
        let shared = &self.broker.shared;
        shared.ensure_online()?;

        if let Some(expected) = &shared.options.credentials
            && self.credentials.as_ref() != Some(expected)
        {
            let username = self
                .credentials
                .as_ref()
                .map(|c| c.username.clone())
                .unwrap_or_default();
            return AuthRejectedSnafu { username }.fail();
        }

        let opened = shared.connections_opened.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(broker = %shared.name, opened, "Memory broker connection opened");

        Ok(Box::new(MemoryConnection {
            shared: shared.clone(),
            open: true,
        }))
    }

    fn describe(&self) -> String {
        self.broker.shared.url()
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    open: bool,
}

impl MemoryConnection {
    fn check<T>(&mut self, result: Result<T, BrokerError>) -> Result<T, BrokerError> {
        if let Err(e) = &result
            && e.is_connection_lost()
        {
            self.open = false;
        }
        result
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, queue: &str, message: Message) -> Result<(), BrokerError> {
        ensure!(self.open, ConnectionClosedSnafu);
        let result = self.shared.enqueue(queue, message);
        self.check(result)
    }

    async fn receive(
        &mut self,
        queue: &str,
        wait: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let deadline = Instant::now() + wait;

        loop {
            ensure!(self.open, ConnectionClosedSnafu);

            let popped = self.shared.try_pop(queue);
            let notify = match self.check(popped)? {
                Ok(envelope) => {
                    let message = envelope.message.clone();
                    let deliveries = envelope.deliveries;
                    let acker = MemoryAcker {
                        shared: self.shared.clone(),
                        queue: queue.to_string(),
                        envelope: Some(envelope),
                    };
                    return Ok(Some(Delivery::new(message, deliveries, Box::new(acker))));
                }
                Err(notify) => notify,
            };

            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open && self.shared.online.load(Ordering::Acquire)
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    envelope: Option<Envelope>,
}

impl MemoryAcker {
    fn settle(&mut self, settlement: Settlement) -> Result<(), BrokerError> {
        match self.envelope.take() {
            Some(envelope) => self.shared.settle(&self.queue, envelope, settlement),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut this = self;
        this.settle(Settlement::Ack)
    }

    async fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut this = self;
        this.settle(Settlement::Nack)
    }

    async fn reject(self: Box<Self>) -> Result<(), BrokerError> {
        let mut this = self;
        this.settle(Settlement::Reject)
    }
}

impl Drop for MemoryAcker {
    // Unsettled deliveries go back to the queue.
    fn drop(&mut self) {
        let _ = self.settle(Settlement::Nack);
    }
}
