//! Failure records and statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conveyor_core::metrics::events::FailureStage;

/// Category of an ingestion failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Not a well-formed order document.
    Decode,
    /// Decodable but business-invalid.
    Validation,
    /// The broker was unreachable or refused the message.
    Publish,
    /// Local I/O or other infrastructure trouble.
    Infrastructure,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Decode => "decode",
            FailureKind::Validation => "validation",
            FailureKind::Publish => "publish",
            FailureKind::Infrastructure => "infrastructure",
        }
    }
}

/// A file that was routed to the error directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFile {
    /// Where the file was found.
    pub source_path: String,
    /// Where the file now lives.
    pub dead_letter_path: String,
    /// Human-readable failure reason.
    pub reason: String,
    pub kind: FailureKind,
    pub stage: FailureStage,
    /// Present when the document decoded far enough to carry one.
    pub order_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Failure counts by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureStats {
    pub read: usize,
    pub decode: usize,
    pub validate: usize,
    pub publish: usize,
}

impl FailureStats {
    pub fn increment(&mut self, stage: FailureStage) {
        match stage {
            FailureStage::Read => self.read += 1,
            FailureStage::Decode => self.decode += 1,
            FailureStage::Validate => self.validate += 1,
            FailureStage::Publish => self.publish += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.read + self.decode + self.validate + self.publish
    }
}
