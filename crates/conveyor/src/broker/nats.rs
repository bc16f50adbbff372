//! NATS JetStream backend.
//!
//! Each queue maps to a JetStream stream of the same subject, consumed
//! through a durable pull consumer with explicit acknowledgement. Negative
//! acknowledgements trigger redelivery; rejected messages are terminated.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream::{self, AckKind, consumer};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use super::memory::DEFAULT_MAX_DELIVERIES;
use super::{
    Acknowledger, CONTENT_TYPE_HEADER, Connection, ConnectionFactory, Credentials, Delivery,
    Message,
};
use crate::error::BrokerError;

/// Durable consumer name shared by every conveyor consumer.
const DURABLE_NAME: &str = "conveyor";

fn protocol(error: impl std::fmt::Display) -> BrokerError {
    BrokerError::Protocol {
        message: error.to_string(),
    }
}

/// Stream names may not contain dots.
fn stream_name(queue: &str) -> String {
    queue.replace(['.', '*', '>', ' '], "_")
}

/// Opens JetStream connections.
#[derive(Debug, Clone)]
pub struct NatsConnectionFactory {
    url: String,
    credentials: Option<Credentials>,
}

impl NatsConnectionFactory {
    pub fn new(url: String, credentials: Option<Credentials>) -> Self {
        Self { url, credentials }
    }
}

#[async_trait]
impl ConnectionFactory for NatsConnectionFactory {
    async fn connect(&self) -> Result<Box<dyn Connection>, BrokerError> {
        let options = match &self.credentials {
            Some(c) => async_nats::ConnectOptions::new()
                .user_and_password(c.username.clone(), c.password.clone()),
            None => async_nats::ConnectOptions::new(),
        };

        let client = options
            .connect(self.url.as_str())
            .await
            .map_err(|e| BrokerError::Unreachable {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        debug!(url = %self.url, "Connected to NATS");

        Ok(Box::new(NatsConnection {
            context: jetstream::new(client.clone()),
            client,
            streams: HashMap::new(),
            consumers: HashMap::new(),
        }))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

struct NatsConnection {
    client: async_nats::Client,
    context: jetstream::Context,
    streams: HashMap<String, jetstream::stream::Stream>,
    consumers: HashMap<String, consumer::Consumer<consumer::pull::Config>>,
}

impl NatsConnection {
    async fn stream(&mut self, queue: &str) -> Result<jetstream::stream::Stream, BrokerError> {
        if let Some(stream) = self.streams.get(queue) {
            return Ok(stream.clone());
        }

        let stream = self
            .context
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_name(queue),
                subjects: vec![queue.to_string()],
                ..Default::default()
            })
            .await
            .map_err(protocol)?;

        self.streams.insert(queue.to_string(), stream.clone());
        Ok(stream)
    }

    async fn consumer(
        &mut self,
        queue: &str,
    ) -> Result<consumer::Consumer<consumer::pull::Config>, BrokerError> {
        if let Some(consumer) = self.consumers.get(queue) {
            return Ok(consumer.clone());
        }

        let stream = self.stream(queue).await?;
        let consumer = stream
            .get_or_create_consumer(
                DURABLE_NAME,
                consumer::pull::Config {
                    durable_name: Some(DURABLE_NAME.to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    max_deliver: i64::from(DEFAULT_MAX_DELIVERIES),
                    ..Default::default()
                },
            )
            .await
            .map_err(protocol)?;

        self.consumers.insert(queue.to_string(), consumer.clone());
        Ok(consumer)
    }
}

#[async_trait]
impl Connection for NatsConnection {
    async fn send(&mut self, queue: &str, message: Message) -> Result<(), BrokerError> {
        self.stream(queue).await?;

        let mut headers = async_nats::HeaderMap::new();
        for (name, value) in &message.headers {
            headers.insert(name.as_str(), value.as_str());
        }
        let body = bytes::Bytes::copy_from_slice(message.payload.as_bytes());

        self.context
            .publish_with_headers(queue.to_string(), headers, body)
            .await
            .map_err(protocol)?
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn receive(
        &mut self,
        queue: &str,
        wait: Duration,
    ) -> Result<Option<Delivery>, BrokerError> {
        let consumer = self.consumer(queue).await?;
        let mut batch = consumer
            .batch()
            .max_messages(1)
            .expires(wait)
            .messages()
            .await
            .map_err(protocol)?;

        let Some(next) = batch.next().await else {
            return Ok(None);
        };
        let received = next.map_err(protocol)?;

        let mut headers = BTreeMap::new();
        if let Some(content_type) = received
            .headers
            .as_ref()
            .and_then(|h| h.get(CONTENT_TYPE_HEADER))
        {
            headers.insert(
                CONTENT_TYPE_HEADER.to_string(),
                content_type.as_str().to_string(),
            );
        }

        let delivery_count = received
            .info()
            .map(|info| u32::try_from(info.delivered).unwrap_or(u32::MAX))
            .unwrap_or(1);
        let message = Message::from_wire(received.payload.clone(), headers);

        Ok(Some(Delivery::new(
            message,
            delivery_count,
            Box::new(NatsAcker { message: received }),
        )))
    }

    fn is_open(&self) -> bool {
        !matches!(self.client.connection_state(), State::Disconnected)
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acknowledger for NatsAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.message.ack().await.map_err(protocol)
    }

    async fn nack(self: Box<Self>) -> Result<(), BrokerError> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(protocol)
    }

    async fn reject(self: Box<Self>) -> Result<(), BrokerError> {
        self.message.ack_with(AckKind::Term).await.map_err(protocol)
    }
}
