//! Internal events for conveyor metrics emission.
//!
//! Each event struct represents something measurable in the pipeline and
//! knows which Prometheus series it feeds. The `target` label carries the
//! route or consumer key.

use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Ingestion stage at which a file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Reading the file from the watched directory.
    Read,
    /// Parsing the document as an order.
    Decode,
    /// Business validation of the decoded order.
    Validate,
    /// Handing the normalized payload to the broker.
    Publish,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Read => "read",
            FailureStage::Decode => "decode",
            FailureStage::Validate => "validate",
            FailureStage::Publish => "publish",
        }
    }
}

/// Terminal state of an ingested file.
#[derive(Debug, Clone, Copy)]
pub enum FileStatus {
    Published,
    DeadLettered,
}

impl FileStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Published => "published",
            FileStatus::DeadLettered => "dead_lettered",
        }
    }
}

/// Settlement of a consumed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Processed and acknowledged.
    Acked,
    /// Processing failed; handed back to the broker for redelivery.
    Redelivered,
    /// Undecodable; rejected without requeue.
    Rejected,
}

impl ConsumeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumeOutcome::Acked => "acked",
            ConsumeOutcome::Redelivered => "redelivered",
            ConsumeOutcome::Rejected => "rejected",
        }
    }
}

/// Files found in a watched directory during one listing.
pub struct FilesDiscovered {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for FilesDiscovered {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Files discovered");
        counter!("conveyor_files_discovered_total", "target" => self.target).increment(self.count);
    }
}

/// A file reached its terminal location.
pub struct FileProcessed {
    pub status: FileStatus,
    pub target: String,
}

impl InternalEvent for FileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), target = %self.target, "File processed");
        counter!("conveyor_files_processed_total", "status" => self.status.as_str(), "target" => self.target)
            .increment(1);
    }
}

/// A file was moved to the error directory.
pub struct FileDeadLettered {
    pub stage: FailureStage,
    pub target: String,
}

impl InternalEvent for FileDeadLettered {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), target = %self.target, "File dead-lettered");
        counter!("conveyor_files_dead_lettered_total", "stage" => self.stage.as_str(), "target" => self.target)
            .increment(1);
    }
}

/// Files waiting in a watched directory after a listing.
pub struct PendingFiles {
    pub count: usize,
    pub target: String,
}

impl InternalEvent for PendingFiles {
    fn emit(self) {
        gauge!("conveyor_pending_files", "target" => self.target).set(self.count as f64);
    }
}

/// An order was accepted by the broker.
pub struct OrderPublished {
    pub queue: String,
}

impl InternalEvent for OrderPublished {
    fn emit(self) {
        trace!(queue = %self.queue, "Order published");
        counter!("conveyor_orders_published_total", "queue" => self.queue).increment(1);
    }
}

/// Time spent in a publish call, successful or not.
pub struct PublishDuration {
    pub duration: Duration,
    pub queue: String,
}

impl InternalEvent for PublishDuration {
    fn emit(self) {
        histogram!("conveyor_publish_duration_seconds", "queue" => self.queue)
            .record(self.duration.as_secs_f64());
    }
}

/// A received message was settled.
pub struct MessageConsumed {
    pub outcome: ConsumeOutcome,
    pub queue: String,
}

impl InternalEvent for MessageConsumed {
    fn emit(self) {
        trace!(outcome = self.outcome.as_str(), queue = %self.queue, "Message consumed");
        counter!("conveyor_messages_consumed_total", "outcome" => self.outcome.as_str(), "queue" => self.queue)
            .increment(1);
    }
}

/// The publisher pool opened a new broker connection.
pub struct PoolConnectionOpened;

impl InternalEvent for PoolConnectionOpened {
    fn emit(self) {
        counter!("conveyor_pool_connections_opened_total").increment(1);
    }
}

/// Idle connections cached by the publisher pool.
pub struct PoolIdleConnections {
    pub count: usize,
}

impl InternalEvent for PoolIdleConnections {
    fn emit(self) {
        gauge!("conveyor_pool_idle_connections").set(self.count as f64);
    }
}

/// Result type for polling iterations.
#[derive(Debug, Clone, Copy)]
pub enum IterationResultType {
    Processed,
    NoItems,
}

impl IterationResultType {
    fn as_str(&self) -> &'static str {
        match self {
            IterationResultType::Processed => "processed",
            IterationResultType::NoItems => "no_items",
        }
    }
}

/// A polling iteration finished.
pub struct IterationCompleted {
    pub result: IterationResultType,
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        trace!(
            result = self.result.as_str(),
            duration_ms = self.duration.as_millis(),
            target = %self.target,
            "Iteration completed"
        );
        counter!("conveyor_iterations_total", "result" => self.result.as_str(), "target" => self.target.clone())
            .increment(1);
        histogram!("conveyor_iteration_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_stage_serde() {
        let json = serde_json::to_string(&FailureStage::Validate).unwrap();
        assert_eq!(json, "\"validate\"");
        let parsed: FailureStage = serde_json::from_str("\"publish\"").unwrap();
        assert_eq!(parsed, FailureStage::Publish);
    }

    #[test]
    fn test_labels_match_serde_names() {
        for stage in [
            FailureStage::Read,
            FailureStage::Decode,
            FailureStage::Validate,
            FailureStage::Publish,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json.trim_matches('"'), stage.as_str());
        }
    }

    #[test]
    fn test_emit_without_recorder_is_noop() {
        crate::emit!(OrderPublished {
            queue: "ORDER.CREATED.QUEUE".to_string(),
        });
        crate::emit!(FileDeadLettered {
            stage: FailureStage::Decode,
            target: "orders".to_string(),
        });
    }
}
