//! Broker abstraction.
//!
//! The pipeline talks to a message broker only through [`ConnectionFactory`],
//! [`Connection`] and [`Delivery`]. Backends:
//!
//! - `memory`: in-process broker, selected by `memory://<name>` URLs
//! - `nats`: NATS JetStream, selected by `nats://` URLs (requires the `nats` feature)
//!
//! `pool` provides the bounded connection cache used by the publisher.

pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;
mod pool;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, UnsupportedSchemeSnafu};
#[cfg(not(feature = "nats"))]
use crate::error::FeatureDisabledSnafu;

pub use memory::{MemoryBroker, MemoryBrokerOptions, MemoryConnectionFactory};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};

/// Header carrying the payload media type.
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Media type of text messages.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Media type of opaque binary messages.
pub const BINARY_CONTENT_TYPE: &str = "application/octet-stream";

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A message with headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub payload: Payload,
    pub headers: BTreeMap<String, String>,
}

impl Message {
    /// A text message, marked so that consumers read it as character data.
    pub fn text(body: impl Into<String>) -> Self {
        Self::with_content_type(Payload::Text(body.into()), TEXT_CONTENT_TYPE)
    }

    /// An opaque binary message.
    pub fn binary(body: impl Into<Bytes>) -> Self {
        Self::with_content_type(Payload::Binary(body.into()), BINARY_CONTENT_TYPE)
    }

    fn with_content_type(payload: Payload, content_type: &str) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(CONTENT_TYPE_HEADER.to_string(), content_type.to_string());
        Self { payload, headers }
    }

    /// Rebuild a message from raw bytes and headers received off the wire.
    ///
    /// The body becomes text when the content type says so and the bytes are
    /// valid UTF-8.
    pub fn from_wire(body: Bytes, headers: BTreeMap<String, String>) -> Self {
        let is_text = headers
            .get(CONTENT_TYPE_HEADER)
            .is_some_and(|ct| ct.starts_with("text/"));

        let payload = if is_text {
            match String::from_utf8(body.to_vec()) {
                Ok(text) => Payload::Text(text),
                Err(_) => Payload::Binary(body),
            }
        } else {
            Payload::Binary(body)
        };

        Self { payload, headers }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE_HEADER)
    }

    pub fn is_text(&self) -> bool {
        matches!(self.payload, Payload::Text(_))
    }
}

/// Broker credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Settles a received message with the broker.
#[async_trait]
pub trait Acknowledger: Send {
    /// Processing completed; remove the message.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Processing failed; hand the message back for redelivery.
    async fn nack(self: Box<Self>) -> Result<(), BrokerError>;

    /// The message can never be processed; do not redeliver it.
    async fn reject(self: Box<Self>) -> Result<(), BrokerError>;
}

/// A received message awaiting settlement.
pub struct Delivery {
    pub message: Message,
    /// How many times this message has been delivered, starting at 1.
    pub delivery_count: u32,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, delivery_count: u32, acker: Box<dyn Acknowledger>) -> Self {
        Self {
            message,
            delivery_count,
            acker,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }

    pub async fn ack(self) -> Result<(), BrokerError> {
        self.acker.ack().await
    }

    pub async fn nack(self) -> Result<(), BrokerError> {
        self.acker.nack().await
    }

    pub async fn reject(self) -> Result<(), BrokerError> {
        self.acker.reject().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("delivery_count", &self.delivery_count)
            .finish_non_exhaustive()
    }
}

/// An open session with the broker.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send a message to a queue.
    async fn send(&mut self, queue: &str, message: Message) -> Result<(), BrokerError>;

    /// Wait up to `wait` for the next message on a queue.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn receive(&mut self, queue: &str, wait: Duration)
    -> Result<Option<Delivery>, BrokerError>;

    /// False once the connection is known to be unusable.
    fn is_open(&self) -> bool;
}

/// Opens broker connections.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, BrokerError>;

    /// Broker location for logs, without credentials.
    fn describe(&self) -> String;
}

/// Shared handle to a connection factory.
pub type ConnectionFactoryRef = Arc<dyn ConnectionFactory>;

/// Broker backend named by a URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    Memory,
    Nats,
}

impl BrokerScheme {
    pub fn parse(url: &str) -> Option<Self> {
        let (scheme, _) = url.split_once("://")?;
        match scheme.to_ascii_lowercase().as_str() {
            "memory" => Some(BrokerScheme::Memory),
            "nats" => Some(BrokerScheme::Nats),
            _ => None,
        }
    }

    /// Whether this binary can talk to the backend.
    pub fn is_available(&self) -> bool {
        match self {
            BrokerScheme::Memory => true,
            BrokerScheme::Nats => cfg!(feature = "nats"),
        }
    }
}

/// Build the connection factory named by the broker URL.
pub fn connection_factory(config: &BrokerConfig) -> Result<ConnectionFactoryRef, BrokerError> {
    let Some(scheme) = BrokerScheme::parse(&config.url) else {
        return UnsupportedSchemeSnafu { url: &config.url }.fail();
    };

    match scheme {
        BrokerScheme::Memory => {
            let name = config
                .url
                .split_once("://")
                .map(|(_, rest)| rest.trim_end_matches('/'))
                .unwrap_or_default();
            let broker = MemoryBroker::named(name);
            Ok(Arc::new(broker.connection_factory(config.credentials())))
        }
        #[cfg(feature = "nats")]
        BrokerScheme::Nats => Ok(Arc::new(nats::NatsConnectionFactory::new(
            config.url.clone(),
            config.credentials(),
        ))),
        #[cfg(not(feature = "nats"))]
        BrokerScheme::Nats => FeatureDisabledSnafu {
            scheme: "nats",
            feature: "nats",
        }
        .fail(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_is_marked() {
        let message = Message::text(r#"{"orderId":"O1"}"#);
        assert!(message.is_text());
        assert_eq!(message.content_type(), Some(TEXT_CONTENT_TYPE));
        assert_eq!(message.payload.as_bytes(), br#"{"orderId":"O1"}"#);
    }

    #[test]
    fn test_from_wire_restores_text() {
        let headers = Message::text("hi").headers;
        let message = Message::from_wire(Bytes::from_static(b"hi"), headers);
        assert_eq!(message.payload, Payload::Text("hi".to_string()));

        let message = Message::from_wire(Bytes::from_static(b"hi"), BTreeMap::new());
        assert!(!message.is_text());
    }

    #[test]
    fn test_from_wire_invalid_utf8_stays_binary() {
        let headers = Message::text("").headers;
        let message = Message::from_wire(Bytes::from_static(&[0xff, 0xfe]), headers);
        assert!(!message.is_text());
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!(BrokerScheme::parse("memory://local"), Some(BrokerScheme::Memory));
        assert_eq!(BrokerScheme::parse("NATS://host:4222"), Some(BrokerScheme::Nats));
        assert_eq!(BrokerScheme::parse("tcp://localhost:61616"), None);
        assert_eq!(BrokerScheme::parse("localhost"), None);
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let debug = format!("{:?}", Credentials::new("admin", "secret"));
        assert!(debug.contains("admin"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_connection_factory_rejects_unknown_scheme() {
        let config = BrokerConfig {
            url: "tcp://localhost:61616".to_string(),
            ..BrokerConfig::default()
        };
        let err = connection_factory(&config).err().unwrap();
        assert!(matches!(err, BrokerError::UnsupportedScheme { .. }));
    }

    #[test]
    fn test_memory_urls_share_a_broker() {
        let config = BrokerConfig {
            url: "memory://factory-test".to_string(),
            ..BrokerConfig::default()
        };
        let factory = connection_factory(&config).unwrap();
        assert_eq!(factory.describe(), "memory://factory-test");
    }
}
