//! Error types for the conveyor order pipeline.

use std::path::PathBuf;
use std::time::Duration;

use snafu::prelude::*;

use conveyor_core::metrics::events::FailureStage;

pub use conveyor_core::error::{ConfigError, RunnerSetupError};

use crate::dlq::FailureKind;

// ============ Order Errors ============

/// Errors that can occur while converting orders to and from JSON.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CodecError {
    /// The payload is not a well-formed order document.
    #[snafu(display("Failed to decode order: {source}"))]
    Decode { source: serde_json::Error },

    /// The order could not be serialized.
    #[snafu(display("Failed to encode order: {source}"))]
    Encode { source: serde_json::Error },
}

/// Business validation failures, reported in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ValidationError {
    #[snafu(display("missing order id"))]
    MissingOrderId,

    #[snafu(display("missing customer id"))]
    MissingCustomerId,

    #[snafu(display("non-positive amount"))]
    NonPositiveAmount,
}

impl ValidationError {
    /// Wire name of the field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingOrderId => "orderId",
            ValidationError::MissingCustomerId => "customerId",
            ValidationError::NonPositiveAmount => "amount",
        }
    }
}

// ============ Broker Errors ============

/// Errors reported by a broker backend.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BrokerError {
    /// The broker could not be reached.
    #[snafu(display("Broker at {url} is unreachable: {message}"))]
    Unreachable { url: String, message: String },

    /// The broker refused the supplied credentials.
    #[snafu(display("Broker rejected credentials for user '{username}'"))]
    AuthRejected { username: String },

    /// The queue has reached its configured depth.
    #[snafu(display("Queue '{queue}' is full ({capacity} messages)"))]
    QueueFull { queue: String, capacity: usize },

    /// The connection was closed underneath the caller.
    #[snafu(display("Broker connection closed"))]
    ConnectionClosed,

    /// The broker answered with something unexpected.
    #[snafu(display("Broker protocol error: {message}"))]
    Protocol { message: String },

    /// The URL scheme names no known backend.
    #[snafu(display("Unsupported broker URL '{url}': expected memory:// or nats://"))]
    UnsupportedScheme { url: String },

    /// The backend exists but was not compiled in.
    #[snafu(display("Broker scheme '{scheme}' requires the '{feature}' feature"))]
    FeatureDisabled {
        scheme: String,
        feature: &'static str,
    },
}

impl BrokerError {
    /// True when the connection that produced this error should not be reused.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            BrokerError::Unreachable { .. } | BrokerError::ConnectionClosed
        )
    }
}

/// Errors from the publisher connection pool.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PoolError {
    /// Every pooled connection stayed checked out for the whole wait.
    #[snafu(display("Timed out after {waited:?} waiting for a pooled broker connection"))]
    Exhausted { waited: Duration },

    /// Opening a fresh connection failed.
    #[snafu(display("Failed to open broker connection: {source}"))]
    Connect { source: BrokerError },

    /// The pool was shut down.
    #[snafu(display("Connection pool is closed"))]
    Closed,
}

/// Errors from publishing a message.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    #[snafu(display("Failed to acquire broker connection: {source}"))]
    Acquire { source: PoolError },

    #[snafu(display("Failed to send to '{queue}': {source}"))]
    Send { queue: String, source: BrokerError },

    #[snafu(display("Publish to '{queue}' timed out after {timeout:?}"))]
    Timeout { queue: String, timeout: Duration },
}

impl PublishError {
    /// True for both publish timeouts and pool exhaustion.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            PublishError::Timeout { .. }
                | PublishError::Acquire {
                    source: PoolError::Exhausted { .. }
                }
        )
    }
}

/// Errors from consuming a message.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConsumeError {
    /// The message body is not an order. Terminal for that message.
    #[snafu(display("Undecodable message: {source}"))]
    Undecodable { source: CodecError },

    /// The order handler failed.
    #[snafu(display("Handler failed for order '{order_id}': {message}"))]
    Handler { order_id: String, message: String },

    /// Processing or receiving exceeded its deadline.
    #[snafu(display("Consumer operation timed out after {timeout:?}"))]
    TimedOut { timeout: Duration },

    /// Receiving from the queue failed.
    #[snafu(display("Failed to receive from '{queue}': {source}"))]
    Receive { queue: String, source: BrokerError },

    /// Acknowledging or rejecting the delivery failed.
    #[snafu(display("Failed to settle delivery: {source}"))]
    Settle { source: BrokerError },
}

// ============ Ingestion Errors ============

/// Everything that can go wrong while processing one watched file.
///
/// Each variant names the stage it interrupted; the dead-letter router
/// records both the stage and the failure kind.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    #[snafu(display("Failed to read {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{source}"))]
    DecodeFile { source: CodecError },

    #[snafu(display("Validation failed on '{}': {source}", source.field()))]
    Invalid {
        order_id: Option<String>,
        source: ValidationError,
    },

    #[snafu(display("{source}"))]
    Normalize { source: CodecError },

    #[snafu(display("Failed to publish order '{order_id}': {source}"))]
    Publish {
        order_id: String,
        source: PublishError,
    },
}

impl IngestError {
    /// Stage at which processing stopped.
    pub fn stage(&self) -> FailureStage {
        match self {
            IngestError::ReadFile { .. } => FailureStage::Read,
            IngestError::DecodeFile { .. } => FailureStage::Decode,
            IngestError::Invalid { .. } => FailureStage::Validate,
            IngestError::Normalize { .. } | IngestError::Publish { .. } => FailureStage::Publish,
        }
    }

    /// Failure category used for triage.
    pub fn kind(&self) -> FailureKind {
        match self {
            IngestError::DecodeFile { .. } => FailureKind::Decode,
            IngestError::Invalid { .. } => FailureKind::Validation,
            IngestError::Publish { .. } => FailureKind::Publish,
            IngestError::ReadFile { .. } | IngestError::Normalize { .. } => {
                FailureKind::Infrastructure
            }
        }
    }

    /// Order id, when the failure happened after a successful decode.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            IngestError::Invalid { order_id, .. } => {
                order_id.as_deref().filter(|id| !id.is_empty())
            }
            IngestError::Publish { order_id, .. } => Some(order_id),
            _ => None,
        }
    }
}

// ============ Dead-Letter Errors ============

/// Errors from relocating a failed file or recording its failure.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DlqError {
    #[snafu(display("Failed to create directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{} has no file name", path.display()))]
    InvalidPath { path: PathBuf },

    #[snafu(display("Failed to move {} to {}: {source}", from.display(), to.display()))]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to serialize failure record: {source}"))]
    Serialize { source: serde_json::Error },

    #[snafu(display("Failed to write failure records to {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Errors from removing or archiving a file whose order was published.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompletionError {
    #[snafu(display("Failed to remove {}: {source}", path.display()))]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to archive: {source}"))]
    Archive { source: DlqError },
}

// ============ Intake Errors ============

/// Errors from the order intake collaborator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IntakeError {
    #[snafu(display("Invalid order request: '{field}' {reason}"))]
    InvalidRequest {
        field: &'static str,
        reason: &'static str,
    },

    #[snafu(display("Order '{order_id}' not found"))]
    NotFound { order_id: String },

    #[snafu(display("Failed to encode order: {source}"))]
    EncodeOrder { source: CodecError },

    #[snafu(display("Failed to write order file {}: {source}", path.display()))]
    WriteOrder {
        path: PathBuf,
        source: std::io::Error,
    },
}

// ============ Pipeline Errors ============

/// Top-level errors for running the pipeline.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PipelineError {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("Setup error: {source}"))]
    Setup { source: RunnerSetupError },

    #[snafu(display("Broker error: {source}"))]
    Broker { source: BrokerError },

    #[snafu(display("Failed to prepare directory {}: {source}", path.display()))]
    PrepareDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to list {}: {source}", path.display()))]
    ListDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("DLQ error: {source}"))]
    Dlq { source: DlqError },

    #[snafu(display("Intake error: {source}"))]
    Intake { source: IntakeError },

    #[snafu(display("Route '{route}' is not configured"))]
    UnknownRoute { route: String },

    #[snafu(display("{failed} component(s) failed"))]
    ComponentsFailed { failed: usize },
}

impl From<ConfigError> for PipelineError {
    fn from(source: ConfigError) -> Self {
        PipelineError::Config { source }
    }
}

impl From<DlqError> for PipelineError {
    fn from(source: DlqError) -> Self {
        PipelineError::Dlq { source }
    }
}

impl From<IntakeError> for PipelineError {
    fn from(source: IntakeError) -> Self {
        PipelineError::Intake { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_messages_and_fields() {
        assert_eq!(ValidationError::MissingOrderId.to_string(), "missing order id");
        assert_eq!(
            ValidationError::MissingCustomerId.to_string(),
            "missing customer id"
        );
        assert_eq!(
            ValidationError::NonPositiveAmount.to_string(),
            "non-positive amount"
        );
        assert_eq!(ValidationError::MissingCustomerId.field(), "customerId");
    }

    #[test]
    fn test_ingest_error_stage_and_kind() {
        let err = IngestError::Invalid {
            order_id: Some(String::new()),
            source: ValidationError::MissingOrderId,
        };
        assert_eq!(err.stage(), FailureStage::Validate);
        assert_eq!(err.kind(), FailureKind::Validation);
        assert_eq!(err.order_id(), None);
        assert!(err.to_string().contains("missing order id"));

        let err = IngestError::Publish {
            order_id: "O1".to_string(),
            source: PublishError::Timeout {
                queue: "Q".to_string(),
                timeout: Duration::from_secs(1),
            },
        };
        assert_eq!(err.stage(), FailureStage::Publish);
        assert_eq!(err.kind(), FailureKind::Publish);
        assert_eq!(err.order_id(), Some("O1"));
    }

    #[test]
    fn test_publish_timeout_detection() {
        let exhausted = PublishError::Acquire {
            source: PoolError::Exhausted {
                waited: Duration::from_millis(10),
            },
        };
        assert!(exhausted.is_timeout());

        let closed = PublishError::Send {
            queue: "Q".to_string(),
            source: BrokerError::ConnectionClosed,
        };
        assert!(!closed.is_timeout());
    }
}
